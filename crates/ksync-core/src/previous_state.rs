//! Recovers each sheet's net/pin membership as it stood after the last
//! sync, read back from `<project>.json` (spec §6.4's canonical mirror).
//!
//! Net connectivity on a live `.kicad_sch` file can't be recovered by
//! parsing it — wires are opaque (spec §6.1) and are explicitly not the
//! source of truth for connectivity (spec §4.6: "wires survive because the
//! label set ... is the source of truth"). The canonical JSON mirror this
//! engine writes after every sync already records exactly the per-sheet net
//! and pin-membership data the Reconciler's net diff needs, in the shape
//! spec §6.5 defines — so that mirror doubles as this engine's own net
//! history, not merely an export format. A project being synced for the
//! first time has no mirror yet, so every sheet starts with an empty
//! existing-net map, which is the only correct answer: there is nothing to
//! diff against.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use ksync_model::{Net, NetName, PinNumber, PinRef, Reference, SheetId};

pub fn load_previous_nets(json_path: &Path) -> BTreeMap<SheetId, BTreeMap<NetName, Net>> {
    let mut out = BTreeMap::new();
    let Ok(text) = fs::read_to_string(json_path) else {
        return out;
    };
    let Ok(root) = serde_json::from_str::<Value>(&text) else {
        return out;
    };
    collect(&root, &mut out);
    out
}

fn collect(node: &Value, out: &mut BTreeMap<SheetId, BTreeMap<NetName, Net>>) {
    let Some(sheet_id) = node.get("sheet_id").and_then(Value::as_str) else {
        return;
    };
    let sheet_id = SheetId::new(sheet_id);

    let mut nets = BTreeMap::new();
    if let Some(net_obj) = node.get("nets").and_then(Value::as_object) {
        for (name, net_value) in net_obj {
            let net_name = NetName::new(name.clone());
            let mut net = Net::new(net_name.clone(), sheet_id.clone());
            net.is_power = net_name.looks_like_power();
            if let Some(pins) = net_value.get("pins").and_then(Value::as_array) {
                for pin in pins {
                    let reference = pin.get("ref").and_then(Value::as_str);
                    let pin_number = pin.get("pin").and_then(Value::as_str);
                    if let (Some(reference), Some(pin_number)) = (reference, pin_number) {
                        net.pins.insert(PinRef::new(Reference::new(reference), PinNumber::new(pin_number)));
                    }
                }
            }
            nets.insert(net_name, net);
        }
    }
    out.insert(sheet_id, nets);

    if let Some(subsheets) = node.get("subsheets").and_then(Value::as_array) {
        for child in subsheets {
            collect(child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_mirror_yields_no_previous_nets() {
        let dir = tempfile::tempdir().unwrap();
        let nets = load_previous_nets(&dir.path().join("nonexistent.json"));
        assert!(nets.is_empty());
    }

    #[test]
    fn recovers_pin_membership_from_a_prior_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.json");
        fs::write(
            &path,
            r#"{
                "name": "root", "sheet_id": "s1", "parent": null,
                "components": {},
                "nets": { "CLK": { "pins": [{"ref": "U1", "pin": "3"}] } },
                "subsheets": []
            }"#,
        )
        .unwrap();
        let nets = load_previous_nets(&path);
        let sheet_nets = &nets[&SheetId::new("s1")];
        let clk = &sheet_nets[&NetName::new("CLK")];
        assert!(clk.pins.contains(&PinRef::new(Reference::new("U1"), PinNumber::new("3"))));
    }
}
