//! Sheet Orchestrator: the `sync()` entry point (spec §4.7).
//!
//! Drives the whole pipeline over a declared [`CircuitModel`]: validate,
//! load every sheet in DFS order, match + reconcile + apply each sheet's own
//! components, propagate hierarchical labels across every sheet boundary in
//! reverse-DFS order (so a parent only ever looks at a child's *finalized*
//! label set), then write everything back in that same reverse order. A
//! sheet whose own edits hit a fatal error is simply never written — nothing
//! is staged to disk until `SchematicIndex::write_atomic` runs, so "don't
//! call it" already gives per-sheet all-or-nothing rollback for free (spec
//! §5 "transactional discipline") without a separate undo mechanism.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use ksync_kicad::{KicadError, SchematicIndex};
use ksync_labels::diff_boundary;
use ksync_match::{match_sheet, ComponentKey, Signature};
use ksync_reconcile::{reconcile_child_sheets, reconcile_components, reconcile_nets, reconcile_page_size, Edit, PlanError};

use ksync_model::{
    CircuitModel, Component, LabelDirection, ModelError, NetName, PageSize, Reference, SheetId, SheetPin,
};

use crate::apply::{apply_component_edits, apply_net_renames};
use crate::error::{SyncErrorKind, SyncIssue};
use crate::previous_state::load_previous_nets;
use crate::project::patch_kicad_pro;
use crate::report::{SheetReport, SyncOptions, SyncReport};
use crate::resolver::SymbolResolver;

const EMPTY_SCHEMATIC_TEMPLATE: &str = "(kicad_sch (version 20231120) (generator ksync)\n  (uuid \"{uuid}\")\n  (paper \"A4\")\n)\n";

fn create_empty_schematic_file(path: &Path) -> std::io::Result<()> {
    let text = EMPTY_SCHEMATIC_TEMPLATE.replace("{uuid}", &uuid::Uuid::new_v4().to_string());
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, text)
}

fn load_or_create(path: &Path, force_regenerate: bool) -> Result<SchematicIndex, SyncErrorKind> {
    if force_regenerate || !path.exists() {
        create_empty_schematic_file(path)
            .map_err(|e| SyncErrorKind::WriteFailure(path.display().to_string(), e.to_string()))?;
    }
    SchematicIndex::load(path).map_err(|e| SyncErrorKind::CodecError(e.to_string()))
}

fn model_error_kind(e: ModelError) -> SyncErrorKind {
    match e {
        ModelError::CycleInHierarchy(name) => SyncErrorKind::CycleInHierarchy(name),
        ModelError::DuplicateReference(reference, a, b) => {
            SyncErrorKind::DuplicateReference(format!("{reference} (declared on both '{a}' and '{b}')"))
        }
        other => SyncErrorKind::CodecError(other.to_string()),
    }
}

fn component_from_node(node: &ksync_kicad::ComponentNode, sheet_id: &SheetId) -> Component {
    let mut c = Component::new(node.reference.clone(), node.lib_id.clone(), sheet_id.clone());
    c.unit = node.unit;
    c.value = node.value.clone();
    c.footprint = node.footprint.clone();
    c.position = Some(node.position);
    c.uuid = node.uuid;
    c.properties = node.properties.clone();
    c
}

/// Attributes every net's pins to unit 1 of their reference: the declared
/// model carries no pin-to-unit assignment (that's a symbol-library fact,
/// out of this synchronizer's scope), so multi-unit parts simply never match
/// via topology and fall through to the position/properties or
/// value/footprint strategies instead.
fn signatures_from_nets(nets: &BTreeMap<NetName, ksync_model::Net>) -> HashMap<ComponentKey, Signature> {
    let mut sigs: HashMap<ComponentKey, Signature> = HashMap::new();
    for (net_name, net) in nets {
        for pin in &net.pins {
            sigs.entry((pin.reference.clone(), 1))
                .or_default()
                .insert((pin.pin_number.clone(), net_name.clone()));
        }
    }
    sigs
}

/// Runs a full sync of `declared` against whatever's on disk under
/// `project_root`. Never panics on malformed input — every failure mode
/// becomes a `SyncIssue` on the relevant sheet's report and the orchestrator
/// keeps going with the next sheet (spec §5 "best-effort across sheets").
pub fn sync(project_root: &Path, declared: &CircuitModel, options: SyncOptions, resolver: &dyn SymbolResolver) -> SyncReport {
    let mut report = SyncReport::default();

    if let Err(e) = declared.validate() {
        let mut sheet_report = SheetReport::new("<project>");
        sheet_report.record(SyncIssue::new(model_error_kind(e), options.strict));
        report.sheets.push(sheet_report);
        return report;
    }

    let Some(root_id) = declared.root.clone() else {
        return report;
    };
    let project_name = declared.sheets[&root_id]
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("project")
        .to_string();

    let json_path = project_root.join(format!("{project_name}.json"));
    let previous_nets = load_previous_nets(&json_path);

    let order = declared.dfs_order();
    let mut indices: BTreeMap<SheetId, SchematicIndex> = BTreeMap::new();
    let mut reports: BTreeMap<SheetId, SheetReport> = BTreeMap::new();
    let mut failed: BTreeSet<SheetId> = BTreeSet::new();

    // Pass 1 (DFS, root first): sheet lifecycle, then this sheet's own
    // component edits.
    for sheet_id in &order {
        let sheet = &declared.sheets[sheet_id];
        let mut sheet_report = SheetReport::new(sheet.name.clone());
        let path = project_root.join(&sheet.path);

        let mut index = match load_or_create(&path, options.force_regenerate) {
            Ok(index) => index,
            Err(kind) => {
                sheet_report.record(SyncIssue::new(kind, options.strict));
                failed.insert(sheet_id.clone());
                reports.insert(sheet_id.clone(), sheet_report);
                continue;
            }
        };

        apply_sheet_lifecycle(project_root, declared, sheet_id, &mut index, &mut sheet_report, options.strict);

        let contents = declared.contents.get(sheet_id).cloned().unwrap_or_default();
        let declared_components: Vec<Component> = contents.all_components().cloned().collect();
        let existing_components: Vec<Component> =
            index.components().map(|n| component_from_node(n, sheet_id)).collect();

        let declared_sigs = signatures_from_nets(&contents.nets);
        let previous_sheet_nets = previous_nets.get(sheet_id).cloned().unwrap_or_default();
        let existing_sigs = signatures_from_nets(&previous_sheet_nets);

        let match_result = match_sheet(&declared_components, &existing_components, &declared_sigs, &existing_sigs);
        for ambiguity in &match_result.ambiguities {
            sheet_report.record(SyncIssue::new(
                SyncErrorKind::AmbiguousMatch(ambiguity.declared.0.to_string(), ambiguity.candidates.len()),
                options.strict,
            ));
        }

        let component_edits = match reconcile_components(&declared_components, &existing_components, &match_result) {
            Ok(edits) => edits,
            Err(PlanError::InconsistentMultiUnitRename(reference, ..)) => {
                sheet_report.record(SyncIssue::new(SyncErrorKind::RenameConflict(reference.to_string()), options.strict));
                failed.insert(sheet_id.clone());
                reports.insert(sheet_id.clone(), sheet_report);
                continue;
            }
        };

        match apply_component_edits(&mut index, &component_edits, resolver, &mut sheet_report) {
            Ok(_) => {}
            Err(kind) => {
                sheet_report.record(SyncIssue::new(kind, options.strict));
                failed.insert(sheet_id.clone());
                reports.insert(sheet_id.clone(), sheet_report);
                continue;
            }
        }

        // Net bookkeeping: diff against this engine's own last-recorded
        // state (wires are opaque, so there's no other source for it — see
        // `previous_state`), then apply any rename directly onto the
        // existing label/pin so it keeps its anchor and uuid.
        let rename_map: BTreeMap<Reference, Reference> = match_result
            .matched
            .iter()
            .filter(|p| p.existing.0 != p.declared.0)
            .map(|p| (p.existing.0.clone(), p.declared.0.clone()))
            .collect();
        let net_edits = reconcile_nets(&contents.nets, &previous_sheet_nets, &rename_map);
        apply_net_renames(&mut index, &net_edits);

        recompute_page_size(&mut index, sheet_id, sheet.page_size, &mut sheet_report, options.strict);

        indices.insert(sheet_id.clone(), index);
        reports.insert(sheet_id.clone(), sheet_report);
    }

    // Pass 2 (reverse DFS, leaves first): boundary label/pin propagation.
    for sheet_id in order.iter().rev() {
        let sheet = &declared.sheets[sheet_id];
        let Some(parent_id) = sheet.parent_sheet_id.clone() else { continue };
        if failed.contains(sheet_id) || failed.contains(&parent_id) {
            continue;
        }

        let required: Vec<SheetPin> = declared
            .contents
            .get(&parent_id)
            .and_then(|c| c.sheet_pins.get(&sheet.name))
            .cloned()
            .unwrap_or_default();

        let existing_child_labels: Vec<(NetName, LabelDirection)> = indices[sheet_id]
            .labels()
            .iter()
            .map(|l| (l.net_name.clone(), l.direction))
            .collect();
        let existing_parent_pins: Vec<(NetName, LabelDirection)> = indices[&parent_id]
            .find_sheet(&sheet.name)
            .map(|s| s.pins.iter().map(|p| (p.net_name.clone(), p.direction)).collect())
            .unwrap_or_default();

        let diff = diff_boundary(&required, &existing_child_labels, &existing_parent_pins, |n: &NetName| n.looks_like_power());

        {
            let child_index = indices.get_mut(sheet_id).expect("loaded in pass 1");
            for (name, direction) in &diff.child_labels.to_add {
                let (built, node) = ksync_kicad::build_fresh_label(name, *direction);
                child_index.insert_hierarchical_label(built, node);
            }
            for name in &diff.child_labels.to_remove {
                let _ = child_index.remove_hierarchical_label(name);
            }
        }
        {
            let parent_index = indices.get_mut(&parent_id).expect("loaded in pass 1");
            for (name, direction) in &diff.parent_pins.to_add {
                let (built, node) = ksync_kicad::build_fresh_sheet_pin(name, *direction);
                let _ = parent_index.insert_sheet_pin(&sheet.name, built, node);
            }
            for name in &diff.parent_pins.to_remove {
                let _ = parent_index.remove_sheet_pin(&sheet.name, name);
            }
        }

        if let Some(r) = reports.get_mut(sheet_id) {
            r.labels_added.extend(diff.child_labels.to_add.iter().map(|(n, _)| n.clone()));
            r.labels_removed.extend(diff.child_labels.to_remove.clone());
        }
        if let Some(r) = reports.get_mut(&parent_id) {
            r.labels_added.extend(diff.parent_pins.to_add.iter().map(|(n, _)| n.clone()));
            r.labels_removed.extend(diff.parent_pins.to_remove.clone());
        }
    }

    if options.verify_idempotent {
        verify_idempotent(project_root, declared, &order, &mut reports, &failed, options.strict);
    }

    // Pass 3 (reverse DFS, matching serialization order — spec §4.7 step 6).
    for sheet_id in order.iter().rev() {
        if failed.contains(sheet_id) {
            continue;
        }
        let Some(index) = indices.get(sheet_id) else { continue };
        if index.pending_patch_count() == 0 {
            continue;
        }
        let sheet = &declared.sheets[sheet_id];
        let path = project_root.join(&sheet.path);
        if let Err(e) = index.write_atomic(&path) {
            if let Some(r) = reports.get_mut(sheet_id) {
                r.record(SyncIssue::new(
                    SyncErrorKind::WriteFailure(path.display().to_string(), e.to_string()),
                    options.strict,
                ));
            }
        }
    }

    let sheet_files: Vec<String> = order
        .iter()
        .filter(|id| !failed.contains(*id))
        .map(|id| declared.sheets[id].path.to_string_lossy().into_owned())
        .collect();
    let kicad_pro_path = project_root.join(format!("{project_name}.kicad_pro"));
    if let Err(kind) = patch_kicad_pro(&kicad_pro_path, &project_name, &sheet_files) {
        if let Some(r) = reports.get_mut(&root_id) {
            r.record(SyncIssue::new(kind, options.strict));
        }
    }

    let mirror = declared.to_canonical_json();
    if let Ok(text) = serde_json::to_string_pretty(&mirror) {
        let _ = fs::write(&json_path, text + "\n");
    }

    for sheet_id in &order {
        if let Some(r) = reports.remove(sheet_id) {
            report.sheets.push(r);
        }
    }
    report
}

/// Sheet add/delete (spec §4.7 rule 5): matches this sheet's own children by
/// name, creates a fresh `.kicad_sch` + `(sheet ...)` node for each addition,
/// and deletes both the child's file and its `(sheet ...)` node for each
/// removal.
fn apply_sheet_lifecycle(
    project_root: &Path,
    declared: &CircuitModel,
    sheet_id: &SheetId,
    index: &mut SchematicIndex,
    sheet_report: &mut SheetReport,
    strict: bool,
) {
    let sheet = &declared.sheets[sheet_id];
    let declared_children: Vec<(SheetId, String)> = sheet
        .children
        .iter()
        .filter_map(|id| declared.sheets.get(id).map(|c| (id.clone(), c.name.clone())))
        .collect();
    let existing_children: Vec<(SheetId, String)> = index
        .sheets()
        .iter()
        .map(|s| {
            let id = s.uuid.map(|u| u.to_string()).unwrap_or_else(|| s.name.clone());
            (SheetId::new(id), s.name.clone())
        })
        .collect();

    for edit in reconcile_child_sheets(&declared_children, &existing_children) {
        match edit {
            Edit::AddSheet(id) => {
                let Some(child) = declared.sheets.get(&id) else { continue };
                let child_path = project_root.join(&child.path);
                if let Err(e) = create_empty_schematic_file(&child_path) {
                    sheet_report.record(SyncIssue::new(
                        SyncErrorKind::WriteFailure(child_path.display().to_string(), e.to_string()),
                        strict,
                    ));
                    continue;
                }
                let file_name = child.path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
                let (built, node) = ksync_kicad::build_fresh_sheet(&child.name, file_name);
                index.insert_sheet(built, node);
            }
            Edit::DeleteSheet(_) => {
                // Handled below, once file deletion order is settled.
            }
            _ => {}
        }
    }

    let declared_names: BTreeSet<&str> = declared_children.iter().map(|(_, n)| n.as_str()).collect();
    let to_delete: Vec<(String, std::path::PathBuf)> = index
        .sheets()
        .iter()
        .filter(|s| !declared_names.contains(s.name.as_str()))
        .map(|s| (s.name.clone(), project_root.join(&s.file)))
        .collect();
    for (name, child_path) in to_delete {
        let _ = fs::remove_file(&child_path);
        if let Err(e) = index.remove_sheet(&name) {
            sheet_report.record(SyncIssue::new(kicad_err(e), strict));
        }
    }
}

fn kicad_err(e: KicadError) -> SyncErrorKind {
    SyncErrorKind::CodecError(e.to_string())
}

fn recompute_page_size(
    index: &mut SchematicIndex,
    sheet_id: &SheetId,
    current: PageSize,
    sheet_report: &mut SheetReport,
    strict: bool,
) {
    let components: Vec<Component> = index.components().map(|n| component_from_node(n, sheet_id)).collect();
    let refs: Vec<&Component> = components.iter().collect();
    let Some(bbox) = ksync_place::bounding_box(&refs) else { return };
    let required = PageSize::smallest_fitting(
        bbox.width() + 2.0 * PageSize::MARGIN_MM,
        bbox.height() + 2.0 * PageSize::MARGIN_MM,
    );
    if let Some(Edit::ChangePageSize(size)) = reconcile_page_size(required, current) {
        if let Err(e) = index.set_page_size(size) {
            sheet_report.record(SyncIssue::new(kicad_err(e), strict));
        }
    }
}

/// Idempotency self-check (spec §4.7 invariant: re-running immediately after
/// a sync produces an empty plan). Reloads the just-written file and re-runs
/// Matcher + Reconciler against the same declared components; any residual
/// edit means the apply pass didn't converge and is reported as an error on
/// that sheet, never panics — by this point the file is already written and
/// there's nothing left to roll back.
fn verify_idempotent(
    project_root: &Path,
    declared: &CircuitModel,
    order: &[SheetId],
    reports: &mut BTreeMap<SheetId, SheetReport>,
    failed: &BTreeSet<SheetId>,
    strict: bool,
) {
    for sheet_id in order {
        if failed.contains(sheet_id) {
            continue;
        }
        let sheet = &declared.sheets[sheet_id];
        let path = project_root.join(&sheet.path);
        let Ok(reloaded) = SchematicIndex::load(&path) else { continue };

        let contents = declared.contents.get(sheet_id).cloned().unwrap_or_default();
        let declared_components: Vec<Component> = contents.all_components().cloned().collect();
        let existing_components: Vec<Component> =
            reloaded.components().map(|n| component_from_node(n, sheet_id)).collect();
        let sigs = signatures_from_nets(&contents.nets);

        let match_result = match_sheet(&declared_components, &existing_components, &sigs, &sigs);
        let edits = reconcile_components(&declared_components, &existing_components, &match_result).unwrap_or_default();
        if !edits.is_empty() {
            log::error!(
                "idempotency check failed for sheet '{}': {} residual edit(s) after apply",
                sheet.name,
                edits.len()
            );
            if let Some(r) = reports.get_mut(sheet_id) {
                r.record(SyncIssue::new(
                    SyncErrorKind::CodecError(format!("idempotency check found {} residual edit(s)", edits.len())),
                    strict,
                ));
            }
        }
    }
}

/// Fallback for callers that don't need a real library resolver.
pub fn sync_with_default_resolver(project_root: &Path, declared: &CircuitModel, options: SyncOptions) -> SyncReport {
    sync(project_root, declared, options, &crate::resolver::AllowAllResolver)
}
