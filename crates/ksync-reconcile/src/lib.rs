//! Reconciler: turns a Matcher bijection into an ordered `EditPlan`.
//!
//! This crate never touches CAD text — it only compares [`ksync_model`]
//! values and the bijection [`ksync_match`] produced, and emits the
//! `Edit` variants the Edit Applier (`ksync-core`) will later execute
//! against a `SchematicIndex`. Component-level edits this module returns
//! are already in a safe internal order (deletes, then renames — with
//! cycles broken via a temporary reference — then adds, then updates);
//! interleaving them with net/sheet/label edits into the final plan is the
//! orchestrator's job, since that ordering spans collaborators this crate
//! doesn't know about.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ksync_match::{ComponentKey, MatchResult};
use ksync_model::{Component, Net, NetName, PageSize, PinRef, Properties, Reference, SheetId};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("unit {1} of reference '{0}' renames to '{2}' while another unit renames to '{3}' — a reference change must be consistent across all units")]
    InconsistentMultiUnitRename(Reference, u32, Reference, Reference),
}

/// Describes which fields of a matched pair changed. `Some(None)` means
/// "the field became absent"; `None` means "unchanged, don't touch it" —
/// this is what keeps `UpdateComponent` from ever writing position,
/// rotation or uuid (spec's field-only canonical update contract).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateFields {
    pub value: Option<Option<String>>,
    pub footprint: Option<Option<String>>,
    pub properties: Option<Properties>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.footprint.is_none() && self.properties.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    AddComponent(Component),
    UpdateComponent { key: ComponentKey, fields: UpdateFields },
    RenameComponent { old: Reference, new: Reference },
    DeleteComponent(ComponentKey),

    AddNet(Net),
    UpdateNetMembership {
        net: NetName,
        add_pins: BTreeSet<PinRef>,
        remove_pins: BTreeSet<PinRef>,
    },
    RenameNet { old: NetName, new: NetName },
    DeleteNet(NetName),

    AddSheet(SheetId),
    DeleteSheet(SheetId),
    ChangePageSize(PageSize),
}

/// Component-level edits for one sheet, derived from a Matcher bijection.
/// Deletes precede renames precede adds precede updates — already safe to
/// apply in this order (spec §4.4 rule 1: deletions before same-reference
/// additions).
pub fn reconcile_components(
    declared: &[Component],
    existing: &[Component],
    match_result: &MatchResult,
) -> Result<Vec<Edit>, PlanError> {
    let declared_by_key: HashMap<ComponentKey, &Component> = declared
        .iter()
        .map(|c| ((c.reference.clone(), c.unit), c))
        .collect();
    let existing_by_key: HashMap<ComponentKey, &Component> = existing
        .iter()
        .map(|c| ((c.reference.clone(), c.unit), c))
        .collect();

    let rename_map = build_rename_map(match_result)?;
    let mut edits = Vec::new();

    for key in &match_result.unmatched_existing {
        edits.push(Edit::DeleteComponent(key.clone()));
    }

    for op in order_renames(rename_map) {
        edits.push(Edit::RenameComponent { old: op.0, new: op.1 });
    }

    for key in &match_result.unmatched_declared {
        if let Some(component) = declared_by_key.get(key) {
            edits.push(Edit::AddComponent((*component).clone()));
        }
    }

    for pair in &match_result.matched {
        let (Some(declared_component), Some(existing_component)) =
            (declared_by_key.get(&pair.declared), existing_by_key.get(&pair.existing))
        else {
            continue;
        };
        if let Some(fields) = diff_fields(declared_component, existing_component) {
            // Addressed by the post-rename reference: the Edit Applier
            // processes renames before updates within this same vec.
            let key = (declared_component.reference.clone(), declared_component.unit);
            edits.push(Edit::UpdateComponent { key, fields });
        }
    }

    Ok(edits)
}

fn diff_fields(declared: &Component, existing: &Component) -> Option<UpdateFields> {
    if !declared.differs_in_fields(existing) {
        return None;
    }
    let mut fields = UpdateFields::default();
    if declared.value != existing.value {
        fields.value = Some(declared.value.clone());
    }
    if declared.footprint != existing.footprint {
        fields.footprint = Some(declared.footprint.clone());
    }
    if declared.properties != existing.properties {
        fields.properties = Some(declared.properties.clone());
    }
    (!fields.is_empty()).then_some(fields)
}

fn build_rename_map(match_result: &MatchResult) -> Result<BTreeMap<Reference, Reference>, PlanError> {
    // existing reference -> (declared reference, a unit that voted for it)
    let mut votes: BTreeMap<Reference, (Reference, u32)> = BTreeMap::new();
    for pair in &match_result.matched {
        let (existing_ref, unit) = (pair.existing.0.clone(), pair.existing.1);
        let declared_ref = pair.declared.0.clone();
        if existing_ref == declared_ref {
            continue;
        }
        match votes.get(&existing_ref) {
            None => {
                votes.insert(existing_ref, (declared_ref, unit));
            }
            Some((prior_declared, prior_unit)) if *prior_declared != declared_ref => {
                return Err(PlanError::InconsistentMultiUnitRename(
                    existing_ref,
                    *prior_unit,
                    prior_declared.clone(),
                    declared_ref,
                ));
            }
            Some(_) => {}
        }
    }
    Ok(votes.into_iter().map(|(old, (new, _))| (old, new)).collect())
}

/// Orders a set of reference renames so no rename ever overwrites a target
/// that hasn't vacated yet, breaking cycles (e.g. `R1<->R2`) with a
/// temporary reference (spec §4.4 "rename execution", atomic reference
/// swap).
fn order_renames(mut pending: BTreeMap<Reference, Reference>) -> Vec<(Reference, Reference)> {
    let mut out = Vec::new();
    while !pending.is_empty() {
        let safe_key = pending
            .iter()
            .find(|(_, new)| !pending.contains_key(*new))
            .map(|(old, _)| old.clone());

        match safe_key {
            Some(old) => {
                let new = pending.remove(&old).expect("key came from this map");
                out.push((old, new));
            }
            None => {
                // Every remaining rename's target is itself about to be
                // renamed away: the remainder is one or more cycles.
                let start = pending.keys().next().cloned().expect("pending is non-empty");
                let mut cycle = vec![start.clone()];
                let mut cursor = start.clone();
                loop {
                    let next = pending.remove(&cursor).expect("cursor stays in-cycle until closed");
                    if next == start {
                        break;
                    }
                    cycle.push(next.clone());
                    cursor = next;
                }
                out.extend(break_rename_cycle(&cycle));
            }
        }
    }
    out
}

/// `cycle[i]` renames to `cycle[(i+1) % n]`. Rewritten as: divert
/// `cycle[0]` to a temp name first, shift every other member one step
/// early, then finish by placing the temp-held entity into the name
/// `cycle[0]` originally wanted.
fn break_rename_cycle(cycle: &[Reference]) -> Vec<(Reference, Reference)> {
    let n = cycle.len();
    if n <= 1 {
        return Vec::new();
    }
    let tmp = Reference::new(format!("_ksync_tmp_{}", uuid::Uuid::new_v4().simple()));
    let mut out = vec![(cycle[0].clone(), tmp.clone())];
    for i in 1..n {
        out.push((cycle[i].clone(), cycle[(i + 1) % n].clone()));
    }
    out.push((tmp, cycle[1 % n].clone()));
    out
}

/// Net membership diff for one sheet. `rename_map` is the same
/// existing-reference -> declared-reference map `reconcile_components`
/// computed, so pins touched by a rename aren't reported as spurious
/// remove+add pairs (spec §4.4 rule 2: "net pin references use the new
/// reference").
pub fn reconcile_nets(
    declared: &BTreeMap<NetName, Net>,
    existing: &BTreeMap<NetName, Net>,
    rename_map: &BTreeMap<Reference, Reference>,
) -> Vec<Edit> {
    let translate = |pins: &BTreeSet<PinRef>| -> BTreeSet<PinRef> {
        pins.iter()
            .map(|p| PinRef {
                reference: rename_map.get(&p.reference).cloned().unwrap_or_else(|| p.reference.clone()),
                pin_number: p.pin_number.clone(),
            })
            .collect()
    };

    let mut declared_only: Vec<NetName> = Vec::new();
    let mut existing_only: Vec<NetName> = Vec::new();
    let mut edits = Vec::new();

    let all_names: BTreeSet<&NetName> = declared.keys().chain(existing.keys()).collect();
    for name in all_names {
        match (declared.get(name), existing.get(name)) {
            (Some(_), Some(e)) => {
                let d = &declared[name];
                let translated_existing = translate(&e.pins);
                let add_pins: BTreeSet<PinRef> = d.pins.difference(&translated_existing).cloned().collect();
                let remove_pins: BTreeSet<PinRef> = translated_existing.difference(&d.pins).cloned().collect();
                if !add_pins.is_empty() || !remove_pins.is_empty() {
                    edits.push(Edit::UpdateNetMembership {
                        net: name.clone(),
                        add_pins,
                        remove_pins,
                    });
                }
            }
            (Some(_), None) => declared_only.push(name.clone()),
            (None, Some(_)) => existing_only.push(name.clone()),
            (None, None) => unreachable!("name came from one of the two maps"),
        }
    }

    // A declared-only net whose (translated) pin set exactly matches an
    // existing-only net's is a net rename, not an independent add+delete —
    // the same "same connectivity, different name" reasoning the Matcher
    // uses for components.
    let mut matched_existing = BTreeSet::new();
    let mut renames = Vec::new();
    for d_name in &declared_only {
        let d_pins = &declared[d_name].pins;
        let hit = existing_only.iter().find(|e_name| {
            !matched_existing.contains(*e_name) && &translate(&existing[*e_name].pins) == d_pins
        });
        if let Some(e_name) = hit {
            matched_existing.insert(e_name.clone());
            renames.push((e_name.clone(), d_name.clone()));
        }
    }
    let renamed_declared: BTreeSet<&NetName> = renames.iter().map(|(_, d)| d).collect();

    for (old, new) in &renames {
        edits.push(Edit::RenameNet { old: old.clone(), new: new.clone() });
    }
    for name in declared_only.into_iter().filter(|n| !renamed_declared.contains(n)) {
        edits.push(Edit::AddNet(declared[&name].clone()));
    }
    for name in existing_only.into_iter().filter(|n| !matched_existing.contains(n)) {
        edits.push(Edit::DeleteNet(name));
    }

    edits
}

pub fn reconcile_page_size(declared: PageSize, current: PageSize) -> Option<Edit> {
    (declared != current).then_some(Edit::ChangePageSize(declared))
}

/// Child-sheet lifecycle: sheets are matched by name (spec §3: globally
/// unique per project), so no separate matcher strategy chain is needed.
pub fn reconcile_child_sheets(
    declared: &[(SheetId, String)],
    existing: &[(SheetId, String)],
) -> Vec<Edit> {
    let declared_names: BTreeSet<&str> = declared.iter().map(|(_, name)| name.as_str()).collect();
    let existing_names: BTreeSet<&str> = existing.iter().map(|(_, name)| name.as_str()).collect();

    let mut edits = Vec::new();
    for (id, name) in declared {
        if !existing_names.contains(name.as_str()) {
            edits.push(Edit::AddSheet(id.clone()));
        }
    }
    for (id, name) in existing {
        if !declared_names.contains(name.as_str()) {
            edits.push(Edit::DeleteSheet(id.clone()));
        }
    }
    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_match::{MatchStrategy, MatchedPair};

    fn comp(reference: &str, unit: u32, lib_id: &str, value: &str) -> Component {
        let mut c = Component::new(Reference::new(reference), lib_id, SheetId::new("s"));
        c.unit = unit;
        c.value = Some(value.to_string());
        c
    }

    #[test]
    fn field_only_update_never_touches_position_or_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let mut existing = comp("R1", 1, "Device:R", "10k");
        existing.uuid = Some(uuid);
        existing.position = Some(ksync_model::Position::new(5.0, 5.0, 90.0));

        let mut declared = existing.clone();
        declared.value = Some("22k".to_string());

        let match_result = MatchResult {
            matched: vec![MatchedPair {
                declared: (Reference::new("R1"), 1),
                existing: (Reference::new("R1"), 1),
                strategy: MatchStrategy::Reference,
            }],
            ..Default::default()
        };

        let edits = reconcile_components(&[declared], &[existing], &match_result).unwrap();
        assert_eq!(edits.len(), 1);
        match &edits[0] {
            Edit::UpdateComponent { fields, .. } => {
                assert_eq!(fields.value, Some(Some("22k".to_string())));
                assert!(fields.footprint.is_none());
                assert!(fields.properties.is_none());
            }
            other => panic!("expected UpdateComponent, got {other:?}"),
        }
    }

    #[test]
    fn swap_rename_goes_through_a_temporary_reference() {
        let match_result = MatchResult {
            matched: vec![
                MatchedPair {
                    declared: (Reference::new("R2"), 1),
                    existing: (Reference::new("R1"), 1),
                    strategy: MatchStrategy::PositionAndProperties,
                },
                MatchedPair {
                    declared: (Reference::new("R1"), 1),
                    existing: (Reference::new("R2"), 1),
                    strategy: MatchStrategy::PositionAndProperties,
                },
            ],
            ..Default::default()
        };
        let declared = vec![comp("R2", 1, "Device:R", "10k"), comp("R1", 1, "Device:R", "22k")];
        let existing = vec![comp("R1", 1, "Device:R", "10k"), comp("R2", 1, "Device:R", "22k")];

        let edits = reconcile_components(&declared, &existing, &match_result).unwrap();
        let renames: Vec<(Reference, Reference)> = edits
            .iter()
            .filter_map(|e| match e {
                Edit::RenameComponent { old, new } => Some((old.clone(), new.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(renames.len(), 3, "two-cycle breaks into three safe steps");
        assert_eq!(renames[0].0, Reference::new("R1"));
        assert!(renames[0].1.as_str().starts_with("_ksync_tmp_"));
        assert_eq!(renames[1], (Reference::new("R2"), Reference::new("R1")));
        assert_eq!(renames[2].1, Reference::new("R2"));
    }

    #[test]
    fn inconsistent_multi_unit_rename_is_an_error() {
        let match_result = MatchResult {
            matched: vec![
                MatchedPair {
                    declared: (Reference::new("U2"), 1),
                    existing: (Reference::new("U1"), 1),
                    strategy: MatchStrategy::PositionAndProperties,
                },
                MatchedPair {
                    declared: (Reference::new("U3"), 2),
                    existing: (Reference::new("U1"), 2),
                    strategy: MatchStrategy::PositionAndProperties,
                },
            ],
            ..Default::default()
        };
        let err = build_rename_map(&match_result).unwrap_err();
        assert!(matches!(err, PlanError::InconsistentMultiUnitRename(..)));
    }

    #[test]
    fn net_rename_detected_by_identical_translated_pin_set() {
        let sheet = SheetId::new("s");
        let pins: BTreeSet<PinRef> = [PinRef::new(Reference::new("R1"), ksync_model::PinNumber::new("1"))]
            .into_iter()
            .collect();

        let mut declared = BTreeMap::new();
        let mut d_net = Net::new(NetName::new("VOUT"), sheet.clone());
        d_net.pins = pins.clone();
        declared.insert(NetName::new("VOUT"), d_net);

        let mut existing = BTreeMap::new();
        let mut e_net = Net::new(NetName::new("NET_OLD"), sheet);
        e_net.pins = pins;
        existing.insert(NetName::new("NET_OLD"), e_net);

        let edits = reconcile_nets(&declared, &existing, &BTreeMap::new());
        assert_eq!(edits.len(), 1);
        assert!(matches!(&edits[0], Edit::RenameNet { old, new }
            if old == &NetName::new("NET_OLD") && new == &NetName::new("VOUT")));
    }

    #[test]
    fn net_membership_diff_uses_rename_map_to_avoid_spurious_churn() {
        let sheet = SheetId::new("s");
        let mut declared = BTreeMap::new();
        let mut d_net = Net::new(NetName::new("CLK"), sheet.clone());
        d_net.pins = [PinRef::new(Reference::new("U2"), ksync_model::PinNumber::new("3"))]
            .into_iter()
            .collect();
        declared.insert(NetName::new("CLK"), d_net);

        let mut existing = BTreeMap::new();
        let mut e_net = Net::new(NetName::new("CLK"), sheet);
        e_net.pins = [PinRef::new(Reference::new("U1"), ksync_model::PinNumber::new("3"))]
            .into_iter()
            .collect();
        existing.insert(NetName::new("CLK"), e_net);

        let mut rename_map = BTreeMap::new();
        rename_map.insert(Reference::new("U1"), Reference::new("U2"));

        let edits = reconcile_nets(&declared, &existing, &rename_map);
        assert!(edits.is_empty(), "rename-map translation should make this a no-op diff");
    }
}
