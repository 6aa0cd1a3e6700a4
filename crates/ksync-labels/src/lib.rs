//! Label Propagator: derives hierarchical-label and sheet-pin edits at a
//! single sheet boundary (spec §4.5).
//!
//! The set of nets that must cross a given child/parent boundary is not
//! recomputed here — `ksync_model::SheetContents::sheet_pins` already
//! carries it, elaborated by the declarative front-end at every level a
//! net needs to reach (that's what makes transitive propagation "just
//! work": the orchestrator calls [`diff_label_set`] once per boundary per
//! sheet, and a net declared three levels deep already has an entry at
//! each intermediate boundary). This crate's job is strictly the
//! set-diff — `{to_add, to_remove, to_keep}`, never an additive overlay —
//! plus power-net exclusion.

use std::collections::{BTreeMap, BTreeSet};

use ksync_model::{LabelDirection, NetName, SheetPin};

/// `{to_add, to_remove, to_keep}` for one side of a sheet boundary (either
/// the child's hierarchical labels or the parent's sheet pins for that
/// child). Computed as a genuine set diff against the full existing set —
/// never shadowed by only adding what's missing — so a net rename or pin
/// removal (spec's issue #380 regression) always produces a `to_remove`
/// entry for the stale name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSetDiff {
    pub to_add: Vec<(NetName, LabelDirection)>,
    pub to_remove: Vec<NetName>,
    pub to_keep: Vec<NetName>,
}

impl LabelSetDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diffs a required `(net_name, direction)` set against what's currently
/// placed. `is_power` nets are excluded from both sides: they're rendered
/// as power-symbol instances and connect implicitly by name, never via a
/// hierarchical label or sheet pin (spec §4.5).
pub fn diff_label_set(
    required: &[(NetName, LabelDirection)],
    existing: &[(NetName, LabelDirection)],
    is_power: impl Fn(&NetName) -> bool,
) -> LabelSetDiff {
    let required: BTreeMap<NetName, LabelDirection> = required
        .iter()
        .filter(|(name, _)| !is_power(name))
        .cloned()
        .collect();
    let existing: BTreeMap<NetName, LabelDirection> = existing
        .iter()
        .filter(|(name, _)| !is_power(name))
        .cloned()
        .collect();

    let required_names: BTreeSet<&NetName> = required.keys().collect();
    let existing_names: BTreeSet<&NetName> = existing.keys().collect();

    let mut diff = LabelSetDiff::default();
    for name in required_names.difference(&existing_names) {
        diff.to_add.push(((*name).clone(), required[*name]));
    }
    for name in existing_names.difference(&required_names) {
        diff.to_remove.push((*name).clone());
    }
    for name in required_names.intersection(&existing_names) {
        diff.to_keep.push((*name).clone());
        // A net kept on both sides but with a changed direction still
        // needs its label/pin rewritten; model that as remove+add so the
        // Edit Applier doesn't need a third "update direction" primitive.
        if required[*name] != existing[*name] {
            diff.to_remove.push((*name).clone());
            diff.to_add.push(((*name).clone(), required[*name]));
        }
    }
    diff
}

/// Both sides of one sheet boundary: the child's label set and the
/// parent's sheet-pin set for that child, diffed independently against
/// the same declared requirement (spec's invariant that every
/// `HierarchicalLabel` has exactly one matching `SheetPin`, and vice
/// versa, is what keeps these two diffs in lockstep).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryDiff {
    pub child_labels: LabelSetDiff,
    pub parent_pins: LabelSetDiff,
}

pub fn diff_boundary(
    required: &[SheetPin],
    existing_child_labels: &[(NetName, LabelDirection)],
    existing_parent_pins: &[(NetName, LabelDirection)],
    is_power: impl Fn(&NetName) -> bool + Copy,
) -> BoundaryDiff {
    let required_pairs: Vec<(NetName, LabelDirection)> = required
        .iter()
        .map(|p| (p.net_name.clone(), p.direction))
        .collect();
    BoundaryDiff {
        child_labels: diff_label_set(&required_pairs, existing_child_labels, is_power),
        parent_pins: diff_label_set(&required_pairs, existing_parent_pins, is_power),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(name: &str, dir: LabelDirection) -> (NetName, LabelDirection) {
        (NetName::new(name), dir)
    }

    #[test]
    fn removed_requirement_produces_stale_removal_not_just_shadowing() {
        // Regression for "additive overlay" (issue #380): a label that's
        // no longer required must appear in `to_remove`, not merely be
        // absent from `to_add`.
        let required = vec![pin("DATA", LabelDirection::Input)];
        let existing = vec![pin("DATA", LabelDirection::Input), pin("CLK", LabelDirection::Output)];
        let diff = diff_label_set(&required, &existing, |_| false);
        assert_eq!(diff.to_add, vec![]);
        assert_eq!(diff.to_remove, vec![NetName::new("CLK")]);
        assert_eq!(diff.to_keep, vec![NetName::new("DATA")]);
    }

    #[test]
    fn direction_change_on_a_kept_net_is_remove_then_add() {
        let required = vec![pin("DATA", LabelDirection::Output)];
        let existing = vec![pin("DATA", LabelDirection::Input)];
        let diff = diff_label_set(&required, &existing, |_| false);
        assert_eq!(diff.to_remove, vec![NetName::new("DATA")]);
        assert_eq!(diff.to_add, vec![pin("DATA", LabelDirection::Output)]);
    }

    #[test]
    fn power_nets_never_produce_a_label_edit() {
        let required = vec![pin("GND", LabelDirection::Bidirectional)];
        let existing: Vec<(NetName, LabelDirection)> = vec![];
        let diff = diff_label_set(&required, &existing, |n| n.looks_like_power());
        assert!(diff.is_empty());
    }

    #[test]
    fn boundary_diff_keeps_label_and_pin_sides_in_lockstep() {
        let required = vec![SheetPin {
            net_name: NetName::new("DATA"),
            direction: LabelDirection::Input,
            uuid: None,
        }];
        let boundary = diff_boundary(&required, &[], &[], |_| false);
        assert_eq!(boundary.child_labels.to_add, vec![pin("DATA", LabelDirection::Input)]);
        assert_eq!(boundary.parent_pins.to_add, vec![pin("DATA", LabelDirection::Input)]);
    }
}
