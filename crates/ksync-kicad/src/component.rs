use std::collections::BTreeMap;

use ksync_model::{Component, Position, Properties, Reference};
use ksync_sexpr::{ListBuilder, Sexpr, Span};

/// A placed `(symbol ...)` node: the typed fields the Edit Applier reads or
/// patches, plus the source spans needed to patch exactly one token at a
/// time (spec §4.4 "field-only canonical update").
#[derive(Debug, Clone)]
pub struct ComponentNode {
    pub reference: Reference,
    pub unit: u32,
    pub lib_id: String,
    pub value: Option<String>,
    pub footprint: Option<String>,
    pub position: Position,
    pub uuid: Option<uuid::Uuid>,
    pub properties: Properties,

    pub(crate) symbol_span: Span,
    pub(crate) reference_span: Span,
    pub(crate) value_span: Option<Span>,
    pub(crate) footprint_span: Option<Span>,
    pub(crate) property_spans: BTreeMap<String, Span>,
}

pub(crate) fn extract(span: Span, list: &[Sexpr]) -> Option<ComponentNode> {
    let lib_id = ksync_sexpr::kicad::lib_id_of(list)?.to_string();
    let (x, y, rot) = ksync_sexpr::kicad::at_of(list).unwrap_or((0.0, 0.0, 0.0));
    let mirror = ksync_sexpr::kicad::mirror_of(list);
    let unit = ksync_sexpr::kicad::unit_of(list);
    let uuid = ksync_sexpr::kicad::uuid_of(list).and_then(|s| uuid::Uuid::parse_str(s).ok());

    let mut reference = None;
    let mut reference_span = None;
    let mut value = None;
    let mut value_span = None;
    let mut footprint = None;
    let mut footprint_span = None;
    let mut properties = Properties::new();
    let mut property_spans = BTreeMap::new();

    for item in list {
        let Some(prop) = item.as_list() else { continue };
        if prop.first().and_then(Sexpr::as_sym) != Some("property") {
            continue;
        }
        let Some(name) = prop.get(1).and_then(Sexpr::as_str) else { continue };
        let value_node = prop.get(2);
        let text = value_node.and_then(Sexpr::as_str).unwrap_or("").to_string();
        let text_span = value_node.map(|v| v.span).unwrap_or_else(Span::synthetic);

        match name {
            "Reference" => {
                reference = Some(text);
                reference_span = Some(text_span);
            }
            "Value" => {
                value = Some(text);
                value_span = Some(text_span);
            }
            "Footprint" => {
                footprint = Some(text);
                footprint_span = Some(text_span);
            }
            other => {
                properties.insert(other, text);
                property_spans.insert(other.to_string(), text_span);
            }
        }
    }

    Some(ComponentNode {
        reference: Reference::new(reference?),
        unit,
        lib_id,
        value,
        footprint,
        position: Position {
            x,
            y,
            rotation: rot,
            mirror,
        },
        uuid,
        properties,
        symbol_span: span,
        reference_span: reference_span?,
        value_span,
        footprint_span,
        property_spans,
    })
}

fn property_node(name: &str, value: &str) -> Sexpr {
    ListBuilder::node("property")
        .push(Sexpr::string(name))
        .push(Sexpr::string(value))
        .push(ListBuilder::node("at").push(0.0).push(0.0).push(0.0).build())
        .build()
}

/// Builds a fresh `(symbol ...)` node for a component that exists only in
/// the declared model (spec §4.6 `AddComponent`). Allocates a UUID if the
/// declared component didn't already carry one (e.g. round-tripped from a
/// prior sync).
pub fn build_fresh_symbol(component: &Component) -> (Sexpr, ComponentNode) {
    let uuid = component.uuid.unwrap_or_else(uuid::Uuid::new_v4);
    let position = component.position.unwrap_or_else(|| Position::new(0.0, 0.0, 0.0));

    let mut builder = ListBuilder::node("symbol")
        .push(ListBuilder::node("lib_id").push(component.lib_id.clone()).build())
        .push(
            ListBuilder::node("at")
                .push(position.x)
                .push(position.y)
                .push(position.rotation)
                .build(),
        )
        .push(ListBuilder::node("unit").push(component.unit as i64).build())
        .push(ListBuilder::node("uuid").push(uuid.to_string()).build())
        .push(property_node("Reference", component.reference.as_str()));

    if let Some(value) = &component.value {
        builder = builder.push(property_node("Value", value));
    }
    if let Some(footprint) = &component.footprint {
        builder = builder.push(property_node("Footprint", footprint));
    }
    for (name, value) in component.properties.iter() {
        builder = builder.push(property_node(name, value));
    }

    let built = builder.build();

    let node = ComponentNode {
        reference: component.reference.clone(),
        unit: component.unit,
        lib_id: component.lib_id.clone(),
        value: component.value.clone(),
        footprint: component.footprint.clone(),
        position,
        uuid: Some(uuid),
        properties: component.properties.clone(),
        symbol_span: Span::synthetic(),
        reference_span: Span::synthetic(),
        value_span: None,
        footprint_span: None,
        property_spans: BTreeMap::new(),
    };

    (built, node)
}
