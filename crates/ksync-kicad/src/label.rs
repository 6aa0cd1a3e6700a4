use ksync_model::{LabelDirection, NetName};
use ksync_sexpr::{ListBuilder, Sexpr, Span};

/// A placed `(hierarchical_label ...)` node.
#[derive(Debug, Clone)]
pub struct LabelNode {
    pub net_name: NetName,
    pub direction: LabelDirection,
    pub uuid: Option<uuid::Uuid>,
    pub(crate) span: Span,
    pub(crate) name_span: Span,
}

/// `LabelDirection` lives in `ksync-model`, which knows nothing about KiCad's
/// `input`/`output`/`bidirectional`/`passive` shape symbols — that mapping
/// belongs to the codec, so it's an extension trait here rather than a
/// method on the model type.
pub trait LabelDirectionExt: Sized {
    fn from_kicad_shape(shape: &str) -> Self;
    fn to_kicad_shape(&self) -> &'static str;
}

impl LabelDirectionExt for LabelDirection {
    fn from_kicad_shape(shape: &str) -> Self {
        match shape {
            "input" => LabelDirection::Input,
            "output" => LabelDirection::Output,
            "passive" => LabelDirection::Passive,
            _ => LabelDirection::Bidirectional,
        }
    }

    fn to_kicad_shape(&self) -> &'static str {
        match self {
            LabelDirection::Input => "input",
            LabelDirection::Output => "output",
            LabelDirection::Bidirectional => "bidirectional",
            LabelDirection::Passive => "passive",
        }
    }
}

pub(crate) fn extract_hierarchical_label(span: Span, list: &[Sexpr]) -> Option<LabelNode> {
    let (name, shape) = ksync_sexpr::kicad::hierarchical_label_name_and_shape(list)?;
    let name_span = list.get(1)?.span;
    let uuid = ksync_sexpr::kicad::uuid_of(list).and_then(|s| uuid::Uuid::parse_str(s).ok());
    Some(LabelNode {
        net_name: NetName::new(name),
        direction: LabelDirection::from_kicad_shape(&shape),
        uuid,
        span,
        name_span,
    })
}

/// Builds a fresh `(hierarchical_label ...)` node (spec §4.5 propagation:
/// a required net with no existing label on this sheet). Position is left
/// at the origin — KiCad repositions a freshly dropped label's anchor the
/// next time the sheet is opened in the GUI; this synchronizer never lays
/// out graphics, only placement-relevant nodes (spec §4.6.1 covers symbols,
/// not labels).
pub fn build_fresh_label(net_name: &NetName, direction: LabelDirection) -> (Sexpr, LabelNode) {
    let uuid = uuid::Uuid::new_v4();
    let built = ListBuilder::node("hierarchical_label")
        .push(Sexpr::string(net_name.0.clone()))
        .push(ListBuilder::node("shape").push(direction.to_kicad_shape()).build())
        .push(ListBuilder::node("at").push(0.0).push(0.0).push(0.0).build())
        .push(ListBuilder::node("uuid").push(uuid.to_string()).build())
        .build();

    let node = LabelNode {
        net_name: net_name.clone(),
        direction,
        uuid: Some(uuid),
        span: Span::synthetic(),
        name_span: Span::synthetic(),
    };

    (built, node)
}

/// A sheet pin belonging to a `(sheet ...)` instance (the parent-side
/// counterpart of a child sheet's hierarchical label).
#[derive(Debug, Clone)]
pub struct SheetPinNode {
    pub net_name: NetName,
    pub direction: LabelDirection,
    pub uuid: Option<uuid::Uuid>,
    pub(crate) span: Span,
    pub(crate) name_span: Span,
}

pub(crate) fn extract_sheet_pins(list: &[Sexpr]) -> Vec<SheetPinNode> {
    list.iter()
        .filter_map(|node| Some((node, node.as_list()?)))
        .filter(|(_, item)| item.first().and_then(Sexpr::as_sym) == Some("pin"))
        .filter_map(|(node, item)| {
            let name_node = item.get(1)?;
            let name = name_node.as_str()?.to_string();
            let direction = item.get(2).and_then(Sexpr::as_sym).unwrap_or("passive");
            let uuid = ksync_sexpr::kicad::uuid_of(item).and_then(|s| uuid::Uuid::parse_str(s).ok());
            Some(SheetPinNode {
                net_name: NetName::new(name),
                direction: LabelDirection::from_kicad_shape(direction),
                uuid,
                span: node.span,
                name_span: name_node.span,
            })
        })
        .collect()
}

/// Builds a fresh parent-side `(pin ...)` node for a `(sheet ...)` instance —
/// the counterpart `build_fresh_label` produces on the child side of the
/// same boundary.
pub fn build_fresh_sheet_pin(net_name: &NetName, direction: LabelDirection) -> (Sexpr, SheetPinNode) {
    let uuid = uuid::Uuid::new_v4();
    let built = ListBuilder::node("pin")
        .push(Sexpr::string(net_name.0.clone()))
        .push(Sexpr::symbol(direction.to_kicad_shape()))
        .push(ListBuilder::node("at").push(0.0).push(0.0).push(0.0).build())
        .push(ListBuilder::node("uuid").push(uuid.to_string()).build())
        .build();

    let node = SheetPinNode {
        net_name: net_name.clone(),
        direction,
        uuid: Some(uuid),
        span: Span::synthetic(),
        name_span: Span::synthetic(),
    };

    (built, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_sexpr::parse;

    #[test]
    fn extracts_label_direction_from_shape() {
        let src = r#"(hierarchical_label "DATA" (shape input) (at 0 0 0) (uuid "x"))"#;
        let parsed = parse(src).unwrap();
        let node = extract_hierarchical_label(parsed.span, parsed.as_list().unwrap()).unwrap();
        assert_eq!(node.net_name, NetName::new("DATA"));
        assert_eq!(node.direction, LabelDirection::Input);
    }

    #[test]
    fn builds_a_fresh_label_with_the_requested_direction() {
        let (built, node) = build_fresh_label(&NetName::new("CLK"), LabelDirection::Output);
        assert_eq!(node.net_name, NetName::new("CLK"));
        assert!(node.uuid.is_some());
        let text = ksync_sexpr::format_sexpr(&built, 0);
        assert!(text.contains("\"CLK\""));
        assert!(text.contains("output"));
    }

    #[test]
    fn builds_a_fresh_sheet_pin_matching_a_child_label() {
        let (built, node) = build_fresh_sheet_pin(&NetName::new("DATA"), LabelDirection::Input);
        assert_eq!(node.net_name, NetName::new("DATA"));
        let text = ksync_sexpr::format_sexpr(&built, 0);
        assert!(text.starts_with("(pin"));
        assert!(text.contains("\"DATA\""));
    }
}
