//! Edit Applier: executes component, net and page-size edits from an
//! `EditPlan` against one sheet's `SchematicIndex` (spec §4.6). Sheet
//! lifecycle (`AddSheet`/`DeleteSheet`) and label/pin edits are driven by
//! the orchestrator instead, since both need more than one sheet's index in
//! hand at once.

use std::collections::BTreeMap;

use ksync_kicad::{ComponentField, KicadError, SchematicIndex};
use ksync_model::{Component, PageSize, Position, Reference};
use ksync_reconcile::Edit;

use crate::error::SyncErrorKind;
use crate::report::SheetReport;
use crate::resolver::SymbolResolver;

fn codec_err(e: KicadError) -> SyncErrorKind {
    SyncErrorKind::CodecError(e.to_string())
}

/// Snapshot of every already-placed component on `index`, used only to
/// compute a bounding box for fresh placement — never written back.
fn existing_for_placement(index: &SchematicIndex) -> Vec<Component> {
    index
        .components()
        .map(|node| {
            let mut c = Component::new(node.reference.clone(), node.lib_id.clone(), ksync_model::SheetId::new("_"));
            c.unit = node.unit;
            c.position = Some(node.position);
            c
        })
        .collect()
}

/// Applies every component edit in plan order (deletes, renames, adds,
/// updates — spec §4.4 rule 1), plus any `ChangePageSize`. Returns the
/// existing-reference -> declared-reference rename map, needed by the
/// caller to translate net pin references before diffing labels. Aborts on
/// the first fatal error, leaving `index`'s accumulated patches in memory —
/// the caller is responsible for never writing them back (spec §5
/// "transactional discipline").
pub fn apply_component_edits(
    index: &mut SchematicIndex,
    edits: &[Edit],
    resolver: &dyn SymbolResolver,
    report: &mut SheetReport,
) -> Result<BTreeMap<Reference, Reference>, SyncErrorKind> {
    let mut rename_map = BTreeMap::new();

    let mut pending_refs: Vec<Reference> = edits
        .iter()
        .filter_map(|e| match e {
            Edit::AddComponent(c) if c.position.is_none() => Some(c.reference.clone()),
            _ => None,
        })
        .collect();
    pending_refs.sort();
    let existing = existing_for_placement(index);
    let existing_refs: Vec<&Component> = existing.iter().collect();
    let placements = ksync_place::place_fresh(&existing_refs, &pending_refs);
    let placement_by_ref: BTreeMap<Reference, Position> =
        pending_refs.into_iter().zip(placements).collect();

    for edit in edits {
        match edit {
            Edit::DeleteComponent((reference, unit)) => {
                index.remove_component(reference, *unit).map_err(codec_err)?;
                report.deleted.push(reference.clone());
            }
            Edit::RenameComponent { old, new } => {
                let units: Vec<u32> = index
                    .components()
                    .filter(|c| &c.reference == old)
                    .map(|c| c.unit)
                    .collect();
                for unit in units {
                    index.rename_component(old, new.clone(), unit).map_err(codec_err)?;
                }
                rename_map.insert(old.clone(), new.clone());
                report.renamed.push((old.clone(), new.clone()));
            }
            Edit::AddComponent(component) => {
                if resolver.resolve(&component.lib_id).is_none() {
                    return Err(SyncErrorKind::UnknownSymbol(component.lib_id.clone()));
                }
                let mut component = component.clone();
                if component.position.is_none() {
                    component.position = placement_by_ref.get(&component.reference).copied();
                }
                let (built, node) = ksync_kicad::build_fresh_symbol(&component);
                index.insert_component(built, node);
                report.added.push(component.reference.clone());
            }
            Edit::UpdateComponent { key, fields } => {
                let (reference, unit) = key.clone();
                if let Some(value) = &fields.value {
                    index
                        .set_component_field(&reference, unit, ComponentField::Value, value.as_deref().unwrap_or(""))
                        .map_err(codec_err)?;
                }
                if let Some(footprint) = &fields.footprint {
                    index
                        .set_component_field(
                            &reference,
                            unit,
                            ComponentField::Footprint,
                            footprint.as_deref().unwrap_or(""),
                        )
                        .map_err(codec_err)?;
                }
                if let Some(properties) = &fields.properties {
                    for (name, value) in properties.iter() {
                        index
                            .set_component_field(&reference, unit, ComponentField::Property(name.clone()), value)
                            .map_err(codec_err)?;
                    }
                }
                report.updated.push(reference);
            }
            Edit::ChangePageSize(size) => {
                index.set_page_size(*size).map_err(codec_err)?;
            }
            Edit::AddNet(_)
            | Edit::UpdateNetMembership { .. }
            | Edit::RenameNet { .. }
            | Edit::DeleteNet(_)
            | Edit::AddSheet(_)
            | Edit::DeleteSheet(_) => {
                // Net bookkeeping has no direct CAD representation (spec
                // §4.6: "net edits update the label set, not wires") and
                // sheet lifecycle spans more than one index — both are the
                // orchestrator's job.
            }
        }
    }

    Ok(rename_map)
}

/// Best-effort net-rename propagation onto whatever label/pin already
/// carries the old name on this sheet — preserves the label's anchor and
/// UUID instead of deleting and re-adding it (spec §4.5's label-set diff
/// handles the case where no such label exists; this only short-circuits
/// the common case where one does). Failing to find a match here is not an
/// error: the net simply isn't exposed as a label/pin on this sheet yet,
/// and the subsequent boundary diff will add one if required.
pub fn apply_net_renames(index: &mut SchematicIndex, edits: &[Edit]) {
    for edit in edits {
        let Edit::RenameNet { old, new } = edit else { continue };
        let _ = index.rename_hierarchical_label(old, new.clone());
        let sheet_names: Vec<String> = index.sheets().iter().map(|s| s.name.clone()).collect();
        for sheet_name in sheet_names {
            let _ = index.rename_sheet_pin(&sheet_name, old, new.clone());
        }
    }
}
