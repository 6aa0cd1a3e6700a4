//! Declared-IR loader (spec §6.2): turns the "tree of sheets + component/net
//! records matching §3" the declarative front-end hands the core into a
//! [`CircuitModel`].
//!
//! Reuses the canonical mirror's own JSON shape (spec §6.5) as the input
//! format rather than inventing a second schema — the two already need the
//! same data, minus one difference: a sheet's file path is never part of
//! the IR. The front-end declares circuit structure, not disk layout; the
//! orchestrator (via `project::sheet_file_path`) decides where each sheet
//! lands.

use std::fs;
use std::path::Path;

use serde_json::Value;

use ksync_model::{CircuitModel, Component, Net, NetName, PinNumber, PinRef, Position, Reference, Sheet, SheetId};

use crate::error::SyncErrorKind;
use crate::project::sheet_file_path;

pub fn load_declared_ir(path: &Path, project_name: &str) -> Result<CircuitModel, SyncErrorKind> {
    let text = fs::read_to_string(path).map_err(|e| SyncErrorKind::CodecError(format!("{}: {e}", path.display())))?;
    let root: Value =
        serde_json::from_str(&text).map_err(|e| SyncErrorKind::CodecError(format!("{}: {e}", path.display())))?;

    let mut model = CircuitModel::new();
    build_sheet(&root, None, true, project_name, &mut model)?;
    Ok(model)
}

fn build_sheet(
    node: &Value,
    parent_sheet_id: Option<SheetId>,
    is_root: bool,
    project_name: &str,
    model: &mut CircuitModel,
) -> Result<SheetId, SyncErrorKind> {
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncErrorKind::CodecError("sheet is missing 'name'".to_string()))?
        .to_string();
    let sheet_id = node
        .get("sheet_id")
        .and_then(Value::as_str)
        .map(SheetId::new)
        .unwrap_or_else(SheetId::generate);
    let path = sheet_file_path(project_name, &name, is_root);

    let mut sheet = Sheet::root(name, path);
    sheet.sheet_id = sheet_id.clone();
    sheet.parent_sheet_id = parent_sheet_id.clone();
    model.add_sheet(sheet);

    if let Some(parent_id) = parent_sheet_id {
        if let Some(parent) = model.sheets.get_mut(&parent_id) {
            parent.children.push(sheet_id.clone());
        }
    }

    if let Some(components) = node.get("components").and_then(Value::as_object) {
        for (reference, value) in components {
            let component = build_component(&sheet_id, reference, value)?;
            model.contents_mut(&sheet_id).insert_component(component);
        }
    }

    if let Some(nets) = node.get("nets").and_then(Value::as_object) {
        for (name, value) in nets {
            let net = build_net(&sheet_id, name, value);
            model.contents_mut(&sheet_id).nets.insert(net.name.clone(), net);
        }
    }

    if let Some(subsheets) = node.get("subsheets").and_then(Value::as_array) {
        for child in subsheets {
            build_sheet(child, Some(sheet_id.clone()), false, project_name, model)?;
        }
    }

    Ok(sheet_id)
}

fn build_component(sheet_id: &SheetId, reference: &str, value: &Value) -> Result<Component, SyncErrorKind> {
    let lib_id = value
        .get("lib_id")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncErrorKind::CodecError(format!("component '{reference}' is missing 'lib_id'")))?;

    let mut component = Component::new(Reference::new(reference), lib_id, sheet_id.clone());
    component.value = value.get("value").and_then(Value::as_str).map(str::to_string);
    component.footprint = value.get("footprint").and_then(Value::as_str).map(str::to_string);
    component.unit = value.get("unit").and_then(Value::as_u64).map(|u| u as u32).unwrap_or(1);

    if let Some(properties) = value.get("properties").and_then(Value::as_object) {
        for (name, prop_value) in properties {
            if let Some(text) = prop_value.as_str() {
                component.properties.insert(name.clone(), text.to_string());
            }
        }
    }

    if let Some(position) = value.get("position") {
        let x = position.get("x").and_then(Value::as_f64).unwrap_or(0.0);
        let y = position.get("y").and_then(Value::as_f64).unwrap_or(0.0);
        let rotation = position.get("rotation").and_then(Value::as_f64).unwrap_or(0.0);
        let mirror = position.get("mirror").and_then(Value::as_bool).unwrap_or(false);
        component.position = Some(Position { x, y, rotation, mirror });
    }

    Ok(component)
}

fn build_net(sheet_id: &SheetId, name: &str, value: &Value) -> Net {
    let net_name = NetName::new(name);
    let mut net = Net::new(net_name.clone(), sheet_id.clone());
    net.is_power = net_name.looks_like_power();
    if let Some(pins) = value.get("pins").and_then(Value::as_array) {
        for pin in pins {
            let reference = pin.get("ref").and_then(Value::as_str);
            let pin_number = pin.get("pin").and_then(Value::as_str);
            if let (Some(reference), Some(pin_number)) = (reference, pin_number) {
                net.pins.insert(PinRef::new(Reference::new(reference), PinNumber::new(pin_number)));
            }
        }
    }
    net
}
