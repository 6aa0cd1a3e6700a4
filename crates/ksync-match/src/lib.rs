//! Matcher: pairs declared components with existing CAD components per
//! sheet via a fixed-order strategy chain, producing a partial bijection.
//!
//! Each strategy removes matched entities from both candidate pools before
//! the next strategy runs, so a component matched early (e.g. by UUID)
//! never gets a second, weaker match later. This crate never decides
//! whether a matched pair needs an `UpdateComponent` edit or what a
//! mismatched reference means — that's the Reconciler's job, working from
//! the bijection this crate returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ksync_model::{Component, NetName, PinNumber, Position, Reference};

/// `(reference, unit)` — the same key `SheetContents` indexes components
/// by, since a bare reference can be ambiguous for multi-unit symbols.
pub type ComponentKey = (Reference, u32);

/// `{(pin_number, net_name)}` for one component — the connectivity
/// fingerprint strategy 3 compares. Built by the caller (the orchestrator
/// has both the net and component tables in hand) rather than recomputed
/// here.
pub type Signature = BTreeSet<(PinNumber, NetName)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchStrategy {
    Uuid,
    Reference,
    Topology,
    PositionAndProperties,
    ValueAndFootprint,
}

#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub declared: ComponentKey,
    pub existing: ComponentKey,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone)]
pub struct Ambiguity {
    pub declared: ComponentKey,
    pub candidates: Vec<ComponentKey>,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Default)]
pub struct MatchResult {
    pub matched: Vec<MatchedPair>,
    pub unmatched_declared: Vec<ComponentKey>,
    pub unmatched_existing: Vec<ComponentKey>,
    pub ambiguities: Vec<Ambiguity>,
}

struct Pool<'a> {
    components: BTreeMap<ComponentKey, &'a Component>,
}

impl<'a> Pool<'a> {
    fn new(components: &'a [Component]) -> Self {
        Self {
            components: components
                .iter()
                .map(|c| ((c.reference.clone(), c.unit), c))
                .collect(),
        }
    }

    fn take(&mut self, key: &ComponentKey) -> Option<&'a Component> {
        self.components.remove(key)
    }

    fn remaining_keys(&self) -> Vec<ComponentKey> {
        self.components.keys().cloned().collect()
    }
}

/// Runs the full strategy chain for one sheet's components and returns the
/// resulting bijection plus anything left over.
pub fn match_sheet(
    declared: &[Component],
    existing: &[Component],
    declared_signatures: &HashMap<ComponentKey, Signature>,
    existing_signatures: &HashMap<ComponentKey, Signature>,
) -> MatchResult {
    let mut declared_pool = Pool::new(declared);
    let mut existing_pool = Pool::new(existing);
    let mut result = MatchResult::default();

    match_by_uuid(&mut declared_pool, &mut existing_pool, &mut result);
    match_by_reference(&mut declared_pool, &mut existing_pool, &mut result);
    match_by_topology(
        &mut declared_pool,
        &mut existing_pool,
        declared_signatures,
        existing_signatures,
        &mut result,
    );
    match_by_position_and_properties(&mut declared_pool, &mut existing_pool, &mut result);
    match_by_value_and_footprint(&mut declared_pool, &mut existing_pool, &mut result);

    result.unmatched_declared = declared_pool.remaining_keys();
    result.unmatched_existing = existing_pool.remaining_keys();
    result.unmatched_declared.sort();
    result.unmatched_existing.sort();
    result
}

/// Candidates in `pool` matching `predicate`, closest position to
/// `reference_position` first, then lexicographic (natural-sort) reference
/// order — spec §4.3's tie-break rule, shared by strategies 4 and 5.
fn ranked_candidates<'a>(
    pool: &Pool<'a>,
    reference_position: Option<&Position>,
    mut predicate: impl FnMut(&ComponentKey, &Component) -> bool,
) -> Vec<ComponentKey> {
    let mut candidates: Vec<(ComponentKey, f64)> = pool
        .components
        .iter()
        .filter(|(key, comp)| predicate(key, comp))
        .map(|(key, comp)| {
            let distance = match (reference_position, comp.position) {
                (Some(a), Some(b)) => a.distance(&b),
                _ => f64::MAX,
            };
            (key.clone(), distance)
        })
        .collect();
    candidates.sort_by(|(key_a, dist_a), (key_b, dist_b)| {
        dist_a
            .partial_cmp(dist_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| key_a.0.cmp(&key_b.0))
            .then_with(|| key_a.1.cmp(&key_b.1))
    });
    candidates.into_iter().map(|(key, _)| key).collect()
}

fn pick_one(
    strategy: MatchStrategy,
    declared_key: &ComponentKey,
    mut candidates: Vec<ComponentKey>,
    result: &mut MatchResult,
) -> Option<ComponentKey> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() > 1 {
        log::warn!(
            "ambiguous {strategy:?} match for {}/{}: {} candidates, picking closest/lowest",
            declared_key.0,
            declared_key.1,
            candidates.len()
        );
        result.ambiguities.push(Ambiguity {
            declared: declared_key.clone(),
            candidates: candidates.clone(),
            strategy,
        });
    }
    Some(candidates.remove(0))
}

fn match_by_uuid(declared_pool: &mut Pool, existing_pool: &mut Pool, result: &mut MatchResult) {
    let candidates: Vec<ComponentKey> = declared_pool.remaining_keys();
    for declared_key in candidates {
        let Some(uuid) = declared_pool.components[&declared_key].uuid else {
            continue;
        };
        let hit = existing_pool
            .components
            .iter()
            .find(|(_, c)| c.uuid == Some(uuid))
            .map(|(k, _)| k.clone());
        if let Some(existing_key) = hit {
            declared_pool.take(&declared_key);
            existing_pool.take(&existing_key);
            result.matched.push(MatchedPair {
                declared: declared_key,
                existing: existing_key,
                strategy: MatchStrategy::Uuid,
            });
        }
    }
}

fn match_by_reference(declared_pool: &mut Pool, existing_pool: &mut Pool, result: &mut MatchResult) {
    let candidates: Vec<ComponentKey> = declared_pool.remaining_keys();
    for declared_key in candidates {
        if existing_pool.components.contains_key(&declared_key) {
            declared_pool.take(&declared_key);
            existing_pool.take(&declared_key);
            result.matched.push(MatchedPair {
                declared: declared_key.clone(),
                existing: declared_key,
                strategy: MatchStrategy::Reference,
            });
        }
    }
}

fn match_by_topology(
    declared_pool: &mut Pool,
    existing_pool: &mut Pool,
    declared_signatures: &HashMap<ComponentKey, Signature>,
    existing_signatures: &HashMap<ComponentKey, Signature>,
    result: &mut MatchResult,
) {
    let candidates: Vec<ComponentKey> = declared_pool.remaining_keys();
    for declared_key in candidates {
        let Some(signature) = declared_signatures.get(&declared_key).filter(|s| !s.is_empty()) else {
            continue;
        };
        let declared_position = declared_pool.components[&declared_key].position;
        let hits = ranked_candidates(existing_pool, declared_position.as_ref(), |key, _| {
            existing_signatures.get(key).is_some_and(|s| s == signature)
        });
        if let Some(existing_key) = pick_one(MatchStrategy::Topology, &declared_key, hits, result) {
            declared_pool.take(&declared_key);
            existing_pool.take(&existing_key);
            result.matched.push(MatchedPair {
                declared: declared_key,
                existing: existing_key,
                strategy: MatchStrategy::Topology,
            });
        }
    }
}

fn match_by_position_and_properties(
    declared_pool: &mut Pool,
    existing_pool: &mut Pool,
    result: &mut MatchResult,
) {
    let candidates: Vec<ComponentKey> = declared_pool.remaining_keys();
    for declared_key in candidates {
        let declared = declared_pool.components[&declared_key];
        let Some(declared_position) = declared.position else {
            continue;
        };
        let hits = ranked_candidates(existing_pool, Some(&declared_position), |_, existing| {
            existing
                .position
                .is_some_and(|p| p.within(&declared_position, Position::DEFAULT_TOLERANCE_MM))
                && existing.matches_type(declared)
        });
        if let Some(existing_key) =
            pick_one(MatchStrategy::PositionAndProperties, &declared_key, hits, result)
        {
            declared_pool.take(&declared_key);
            existing_pool.take(&existing_key);
            result.matched.push(MatchedPair {
                declared: declared_key,
                existing: existing_key,
                strategy: MatchStrategy::PositionAndProperties,
            });
        }
    }
}

fn match_by_value_and_footprint(
    declared_pool: &mut Pool,
    existing_pool: &mut Pool,
    result: &mut MatchResult,
) {
    let candidates: Vec<ComponentKey> = declared_pool.remaining_keys();
    for declared_key in candidates {
        let declared = declared_pool.components[&declared_key];
        let declared_position = declared.position;
        let hits = ranked_candidates(existing_pool, declared_position.as_ref(), |_, existing| {
            existing.matches_type(declared)
        });
        if let Some(existing_key) = pick_one(MatchStrategy::ValueAndFootprint, &declared_key, hits, result)
        {
            declared_pool.take(&declared_key);
            existing_pool.take(&existing_key);
            result.matched.push(MatchedPair {
                declared: declared_key,
                existing: existing_key,
                strategy: MatchStrategy::ValueAndFootprint,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_model::SheetId;

    fn comp(reference: &str, lib_id: &str, value: &str) -> Component {
        let mut c = Component::new(Reference::new(reference), lib_id, SheetId::new("s"));
        c.value = Some(value.to_string());
        c
    }

    #[test]
    fn reference_match_wins_over_value_footprint() {
        let declared = vec![comp("R1", "Device:R", "10k")];
        let existing = vec![comp("R1", "Device:R", "10k"), comp("R2", "Device:R", "10k")];
        let result = match_sheet(&declared, &existing, &HashMap::new(), &HashMap::new());
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].strategy, MatchStrategy::Reference);
        assert_eq!(result.unmatched_existing, vec![(Reference::new("R2"), 1)]);
    }

    #[test]
    fn uuid_match_detects_rename() {
        let uuid = uuid::Uuid::new_v4();
        let mut declared_comp = comp("R2", "Device:R", "10k");
        declared_comp.uuid = Some(uuid);
        let mut existing_comp = comp("R1", "Device:R", "10k");
        existing_comp.uuid = Some(uuid);

        let result = match_sheet(&[declared_comp], &[existing_comp], &HashMap::new(), &HashMap::new());
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].strategy, MatchStrategy::Uuid);
        assert_eq!(result.matched[0].declared, (Reference::new("R2"), 1));
        assert_eq!(result.matched[0].existing, (Reference::new("R1"), 1));
    }

    #[test]
    fn position_and_properties_detects_rename_without_uuid() {
        let mut declared_comp = comp("R2", "Device:R", "10k");
        declared_comp.position = Some(Position::new(10.0, 10.0, 0.0));
        let mut existing_comp = comp("R1", "Device:R", "10k");
        existing_comp.position = Some(Position::new(10.0, 10.0, 0.0));

        let result = match_sheet(&[declared_comp], &[existing_comp], &HashMap::new(), &HashMap::new());
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].strategy, MatchStrategy::PositionAndProperties);
    }

    #[test]
    fn value_footprint_fallback_breaks_ties_by_distance_then_reference() {
        let declared_comp = {
            let mut c = comp("C5", "Device:C", "100nF");
            c.position = Some(Position::new(0.0, 0.0, 0.0));
            c
        };
        let far = {
            let mut c = comp("C9", "Device:C", "100nF");
            c.position = Some(Position::new(100.0, 100.0, 0.0));
            c
        };
        let near = {
            let mut c = comp("C2", "Device:C", "100nF");
            c.position = Some(Position::new(1.0, 0.0, 0.0));
            c
        };
        let result = match_sheet(&[declared_comp], &[far, near], &HashMap::new(), &HashMap::new());
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].existing, (Reference::new("C2"), 1));
        assert_eq!(result.matched[0].strategy, MatchStrategy::ValueAndFootprint);
    }

    #[test]
    fn topology_match_uses_connection_signature() {
        let declared_comp = comp("U9", "Device:OpAmp", "LM358");
        let existing_comp = comp("U1", "Device:OpAmp", "LM358");
        let mut declared_sig = HashMap::new();
        let mut existing_sig = HashMap::new();
        let signature: Signature =
            [(PinNumber::new("1"), NetName::new("OUT"))].into_iter().collect();
        declared_sig.insert((Reference::new("U9"), 1), signature.clone());
        existing_sig.insert((Reference::new("U1"), 1), signature);

        let result = match_sheet(&[declared_comp], &[existing_comp], &declared_sig, &existing_sig);
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].strategy, MatchStrategy::Topology);
    }
}
