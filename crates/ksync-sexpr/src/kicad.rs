//! `.kicad_sch` specific S-expression queries.
//!
//! KiCad schematic symbols are a predictable family of `(tag ...)`
//! sub-lists: `(property "Name" "Value" ...)`, `(pin "1" (uuid "..."))`,
//! `(at x y rot)`. These helpers standardize reading them so the Schematic
//! Index (`ksync-kicad`) doesn't re-derive this structure itself.

use crate::{find_child_list, number_as_f64, Sexpr};
use std::collections::BTreeMap;

/// `(uuid "...")` child of any node.
pub fn uuid_of(node: &[Sexpr]) -> Option<&str> {
    find_child_list(node, "uuid")?.get(1)?.as_str()
}

/// `(lib_id "Device:R")`.
pub fn lib_id_of(symbol: &[Sexpr]) -> Option<&str> {
    find_child_list(symbol, "lib_id")?.get(1)?.as_str()
}

/// `(at x y [rot])`.
pub fn at_of(node: &[Sexpr]) -> Option<(f64, f64, f64)> {
    let at = find_child_list(node, "at")?;
    let x = number_as_f64(at.get(1)?)?;
    let y = number_as_f64(at.get(2)?)?;
    let rot = at.get(3).and_then(number_as_f64).unwrap_or(0.0);
    Some((x, y, rot))
}

/// `(mirror x)` / `(mirror y)`.
pub fn mirror_of(node: &[Sexpr]) -> bool {
    find_child_list(node, "mirror").is_some()
}

/// `(unit N)`.
pub fn unit_of(symbol: &[Sexpr]) -> u32 {
    find_child_list(symbol, "unit")
        .and_then(|u| u.get(1))
        .and_then(Sexpr::as_int)
        .map(|n| n as u32)
        .unwrap_or(1)
}

/// All `(property "Name" "Value" ...)` children, in document order (the
/// order the `reference`/`Value`/`Footprint` properties and any
/// user-defined fields appear on disk).
pub fn properties_of(symbol: &[Sexpr]) -> Vec<(String, String)> {
    symbol
        .iter()
        .filter_map(Sexpr::as_list)
        .filter(|item| item.first().and_then(Sexpr::as_sym) == Some("property"))
        .filter_map(|item| {
            let name = item.get(1)?.as_str()?.to_string();
            let value = item.get(2).and_then(Sexpr::as_str).unwrap_or("").to_string();
            Some((name, value))
        })
        .collect()
}

/// `(reference "R1")` convenience, reading the `Reference` property.
pub fn reference_of(symbol: &[Sexpr]) -> Option<String> {
    properties_of(symbol)
        .into_iter()
        .find(|(name, _)| name == "Reference")
        .map(|(_, value)| value)
}

/// `(pin "<num>" (uuid "..."))` entries on a placed symbol — present when
/// the symbol has per-pin UUIDs assigned (used to anchor hierarchical
/// labels deterministically).
pub fn pin_uuids_of(symbol: &[Sexpr]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for item in symbol.iter().filter_map(Sexpr::as_list) {
        if item.first().and_then(Sexpr::as_sym) != Some("pin") {
            continue;
        }
        let Some(number) = item.get(1).and_then(Sexpr::as_str) else {
            continue;
        };
        if let Some(uuid) = uuid_of(item) {
            out.insert(number.to_string(), uuid.to_string());
        }
    }
    out
}

/// Top-level node tags the core reads or writes directly (spec §6.1).
/// Anything else encountered at sheet top level is an opaque blob.
pub const STRUCTURAL_TAGS: &[&str] = &[
    "symbol",
    "sheet",
    "hierarchical_label",
    "global_label",
    "power",
    "paper",
];

pub fn is_structural_tag(tag: &str) -> bool {
    STRUCTURAL_TAGS.contains(&tag)
}

/// `(sheet_name "Sub1")` / `(sheet_file "Sub1.kicad_sch")` properties of a
/// `(sheet ...)` node (KiCad nests them as `(property "Sheetname" ...)` /
/// `(property "Sheetfile" ...)` rather than dedicated tags).
pub fn sheet_name_and_file(sheet: &[Sexpr]) -> (Option<String>, Option<String>) {
    let props = properties_of(sheet);
    let name = props
        .iter()
        .find(|(k, _)| k == "Sheetname")
        .map(|(_, v)| v.clone());
    let file = props
        .iter()
        .find(|(k, _)| k == "Sheetfile")
        .map(|(_, v)| v.clone());
    (name, file)
}

/// `(pin "NET_NAME" input|output|bidirectional|passive (at ...) (uuid ...))`
/// on a `(sheet ...)` node — the sheet-pin counterpart of a child's
/// hierarchical label.
pub fn sheet_pins_of(sheet: &[Sexpr]) -> Vec<(String, String, Option<String>)> {
    sheet
        .iter()
        .filter_map(Sexpr::as_list)
        .filter(|item| item.first().and_then(Sexpr::as_sym) == Some("pin"))
        .filter_map(|item| {
            let name = item.get(1)?.as_str()?.to_string();
            let direction = item.get(2).and_then(Sexpr::as_sym).unwrap_or("passive").to_string();
            let uuid = uuid_of(item).map(str::to_string);
            Some((name, direction, uuid))
        })
        .collect()
}

/// `(hierarchical_label "NET_NAME" (shape input|output|...) (at ...) (uuid ...))`.
pub fn hierarchical_label_name_and_shape(label: &[Sexpr]) -> Option<(String, String)> {
    let name = label.get(1)?.as_str()?.to_string();
    let shape = find_child_list(label, "shape")
        .and_then(|s| s.get(1))
        .and_then(Sexpr::as_sym)
        .unwrap_or("bidirectional")
        .to_string();
    Some((name, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[test]
    fn reads_component_properties_and_position() {
        let src = r#"
        (symbol (lib_id "Device:R") (at 50.8 50.8 0) (unit 1) (uuid "abc")
          (property "Reference" "R1" (at 0 0 0))
          (property "Value" "10k" (at 0 0 0)))
        "#;
        let parsed = parse(src).unwrap();
        let symbol = parsed.as_list().unwrap();
        assert_eq!(lib_id_of(symbol), Some("Device:R"));
        assert_eq!(at_of(symbol), Some((50.8, 50.8, 0.0)));
        assert_eq!(reference_of(symbol), Some("R1".to_string()));
        assert_eq!(uuid_of(symbol), Some("abc"));
    }

    #[test]
    fn reads_sheet_pin_triples() {
        let src = r#"(sheet (pin "DATA" input (at 0 0 0) (uuid "x")))"#;
        let parsed = parse(src).unwrap();
        let pins = sheet_pins_of(parsed.as_list().unwrap());
        assert_eq!(pins, vec![("DATA".to_string(), "input".to_string(), Some("x".to_string()))]);
    }
}
