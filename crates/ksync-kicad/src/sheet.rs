use ksync_sexpr::{ListBuilder, Sexpr, Span};

use crate::label::{self, SheetPinNode};

/// A `(sheet ...)` instance: a reference to a child sheet file plus the
/// sheet pins connecting it to nets on this sheet.
#[derive(Debug, Clone)]
pub struct SheetNode {
    pub name: String,
    pub file: String,
    pub uuid: Option<uuid::Uuid>,
    pub pins: Vec<SheetPinNode>,
    pub(crate) span: Span,
}

pub(crate) fn extract(span: Span, list: &[Sexpr]) -> Option<SheetNode> {
    let (name, file) = ksync_sexpr::kicad::sheet_name_and_file(list);
    let uuid = ksync_sexpr::kicad::uuid_of(list).and_then(|s| uuid::Uuid::parse_str(s).ok());
    Some(SheetNode {
        name: name.unwrap_or_default(),
        file: file.unwrap_or_default(),
        uuid,
        pins: label::extract_sheet_pins(list),
        span,
    })
}

/// Builds a fresh `(sheet ...)` instance for a child sheet that exists only
/// in the declared hierarchy (spec §4.7 "for sheet additions: create empty
/// Index"). Starts with no pins — the Label Propagator adds them on its own
/// pass over the boundary, same as for any other sheet.
pub fn build_fresh_sheet(name: &str, file: &str) -> (Sexpr, SheetNode) {
    let uuid = uuid::Uuid::new_v4();
    let built = ListBuilder::node("sheet")
        .push(ListBuilder::node("at").push(0.0).push(0.0).build())
        .push(ListBuilder::node("uuid").push(uuid.to_string()).build())
        .push(
            ListBuilder::node("property")
                .push(Sexpr::string("Sheetname"))
                .push(Sexpr::string(name))
                .build(),
        )
        .push(
            ListBuilder::node("property")
                .push(Sexpr::string("Sheetfile"))
                .push(Sexpr::string(file))
                .build(),
        )
        .build();

    let node = SheetNode {
        name: name.to_string(),
        file: file.to_string(),
        uuid: Some(uuid),
        pins: Vec::new(),
        span: Span::synthetic(),
    };

    (built, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_sexpr::parse;

    #[test]
    fn extracts_name_file_and_pins() {
        let src = r#"(sheet
          (property "Sheetname" "Power")
          (property "Sheetfile" "power.kicad_sch")
          (pin "VCC" input (at 0 0 0) (uuid "p1")))"#;
        let parsed = parse(src).unwrap();
        let node = extract(parsed.span, parsed.as_list().unwrap()).unwrap();
        assert_eq!(node.name, "Power");
        assert_eq!(node.file, "power.kicad_sch");
        assert_eq!(node.pins.len(), 1);
    }

    #[test]
    fn builds_a_fresh_sheet_with_no_pins() {
        let (built, node) = build_fresh_sheet("Power", "power.kicad_sch");
        assert_eq!(node.name, "Power");
        assert!(node.pins.is_empty());
        let text = ksync_sexpr::format_sexpr(&built, 0);
        assert!(text.contains("\"Power\""));
        assert!(text.contains("\"power.kicad_sch\""));
    }
}
