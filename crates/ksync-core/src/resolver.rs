//! Library resolver collaborator (spec §9: "symbol lookup via reflection
//! into on-disk library files" → an explicit `resolve(lib_id)` interface).
//!
//! The actual symbol library — where `lib_id`s like `Device:R` come from
//! and what pin count/function they carry — lives outside this
//! synchronizer's scope (spec §6.1 names the tokens the core reads/writes,
//! not where they're defined). This crate only needs to know *whether* a
//! `lib_id` resolves, so `AddComponent` can report `UnknownSymbol` instead
//! of silently inserting a node no CAD tool can render.

/// Minimal facts about a resolved symbol the applier needs: nothing here
/// currently branches on `unit_count`, but it's the one piece of
/// library-side data spec §4.2.1 (multi-unit indexing) implies the real
/// resolver would carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDescriptor {
    pub lib_id: String,
    pub unit_count: u32,
}

pub trait SymbolResolver {
    fn resolve(&self, lib_id: &str) -> Option<SymbolDescriptor>;
}

/// Accepts every `lib_id` with a single unit. Used when no real library
/// collaborator is wired up; callers that need `UnknownSymbol` to ever
/// actually fire should supply their own `SymbolResolver`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllResolver;

impl SymbolResolver for AllowAllResolver {
    fn resolve(&self, lib_id: &str) -> Option<SymbolDescriptor> {
        Some(SymbolDescriptor {
            lib_id: lib_id.to_string(),
            unit_count: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_resolves_anything() {
        let resolver = AllowAllResolver;
        assert!(resolver.resolve("Device:R").is_some());
        assert!(resolver.resolve("Totally:Unknown").is_some());
    }
}
