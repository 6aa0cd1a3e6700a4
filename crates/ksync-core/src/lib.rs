//! Edit Applier and Sheet Orchestrator: the crate that drives a full project
//! sync end to end, on top of [`ksync_kicad`]'s per-sheet index, [`ksync_match`]'s
//! bijection and [`ksync_reconcile`]'s edit plans.

mod apply;
mod error;
mod ir;
mod orchestrator;
mod previous_state;
mod project;
mod report;
mod resolver;

pub use error::{SyncErrorKind, SyncIssue};
pub use ir::load_declared_ir;
pub use orchestrator::{sync, sync_with_default_resolver};
pub use project::{patch_kicad_pro, sanitize_sheet_filename, sheet_file_path};
pub use report::{SheetReport, SyncOptions, SyncReport};
pub use resolver::{AllowAllResolver, SymbolDescriptor, SymbolResolver};

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_model::{CircuitModel, Component, PinNumber, PinRef, Reference, Sheet, SheetId};

    fn single_resistor_project() -> (tempfile::TempDir, CircuitModel) {
        let dir = tempfile::tempdir().unwrap();
        let mut model = CircuitModel::new();
        let root = Sheet::root("widget", "widget.kicad_sch");
        let root_id = root.sheet_id.clone();
        model.add_sheet(root);
        let mut r1 = Component::new(Reference::new("R1"), "Device:R", root_id.clone());
        r1.value = Some("10k".to_string());
        model.contents_mut(&root_id).insert_component(r1);
        (dir, model)
    }

    #[test]
    fn first_sync_creates_the_root_schematic_with_the_declared_component() {
        let (dir, model) = single_resistor_project();
        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert!(!report.has_errors(), "{report:?}");
        assert_eq!(report.sheets.len(), 1);
        assert_eq!(report.sheets[0].added, vec![Reference::new("R1")]);

        let text = std::fs::read_to_string(dir.path().join("widget.kicad_sch")).unwrap();
        assert!(text.contains("Device:R"));
        assert!(text.contains(r#""R1""#));
    }

    #[test]
    fn resyncing_an_unchanged_model_is_a_clean_no_op() {
        let (dir, model) = single_resistor_project();
        sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert!(!report.has_errors());
        assert!(report.sheets[0].is_clean());
    }

    #[test]
    fn unresolvable_symbol_is_reported_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = CircuitModel::new();
        let root = Sheet::root("widget", "widget.kicad_sch");
        let root_id = root.sheet_id.clone();
        model.add_sheet(root);
        model
            .contents_mut(&root_id)
            .insert_component(Component::new(Reference::new("U1"), "Totally:Unknown", root_id.clone()));

        struct RejectAll;
        impl SymbolResolver for RejectAll {
            fn resolve(&self, _lib_id: &str) -> Option<SymbolDescriptor> {
                None
            }
        }

        let report = sync(dir.path(), &model, SyncOptions::default(), &RejectAll);
        assert!(report.has_errors());
        assert!(!dir.path().join("widget.kicad_sch").exists() || {
            let text = std::fs::read_to_string(dir.path().join("widget.kicad_sch")).unwrap();
            !text.contains("Totally:Unknown")
        });
    }

    #[test]
    fn renaming_a_component_updates_the_reference_in_place() {
        let (dir, mut model) = single_resistor_project();
        sync_with_default_resolver(dir.path(), &model, SyncOptions::default());

        let root_id = model.root.clone().unwrap();
        let mut contents = model.contents.get(&root_id).cloned().unwrap();
        let r1 = contents.components.remove(&Reference::new("R1")).unwrap();
        let mut renamed = r1[&1].clone();
        renamed.reference = Reference::new("R2");
        contents.components.entry(Reference::new("R2")).or_default().insert(1, renamed);
        model.contents.insert(root_id, contents);

        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert!(!report.has_errors(), "{report:?}");
        assert_eq!(report.sheets[0].renamed, vec![(Reference::new("R1"), Reference::new("R2"))]);
        let text = std::fs::read_to_string(dir.path().join("widget.kicad_sch")).unwrap();
        assert!(text.contains(r#""R2""#));
        assert!(!text.contains(r#""R1""#));
    }

    #[test]
    fn hierarchical_net_propagates_labels_and_sheet_pins_across_a_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = CircuitModel::new();
        let mut root = Sheet::root("widget", "widget.kicad_sch");
        let root_id = root.sheet_id.clone();
        let mut child = Sheet::root("Power", "Power.kicad_sch");
        child.parent_sheet_id = Some(root_id.clone());
        let child_id = child.sheet_id.clone();
        root.children.push(child_id.clone());
        model.add_sheet(root);
        model.add_sheet(child);

        model.contents_mut(&root_id).sheet_pins.insert(
            "Power".to_string(),
            vec![SheetPinFixture::input("VOUT")],
        );

        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert!(!report.has_errors(), "{report:?}");

        let child_text = std::fs::read_to_string(dir.path().join("Power.kicad_sch")).unwrap();
        assert!(child_text.contains("hierarchical_label"));
        assert!(child_text.contains("VOUT"));

        let root_index = ksync_kicad::SchematicIndex::load(dir.path().join("widget.kicad_sch")).unwrap();
        let sheet = root_index.find_sheet("Power").expect("the newly created child sheet is present");
        assert!(
            sheet.pins.iter().any(|p| p.net_name == ksync_model::NetName::new("VOUT")),
            "VOUT is nested inside the (sheet ...) node, not merely present somewhere in the file"
        );
    }

    struct SheetPinFixture;
    impl SheetPinFixture {
        fn input(name: &str) -> ksync_model::SheetPin {
            ksync_model::SheetPin {
                net_name: ksync_model::NetName::new(name),
                direction: ksync_model::LabelDirection::Input,
                uuid: None,
            }
        }
    }

    #[test]
    fn net_rename_propagates_to_an_existing_label_without_dropping_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = CircuitModel::new();
        let mut root = Sheet::root("widget", "widget.kicad_sch");
        let root_id = root.sheet_id.clone();
        let mut child = Sheet::root("Power", "Power.kicad_sch");
        child.parent_sheet_id = Some(root_id.clone());
        let child_id = child.sheet_id.clone();
        root.children.push(child_id.clone());
        model.add_sheet(root);
        model.add_sheet(child);
        model
            .contents_mut(&root_id)
            .sheet_pins
            .insert("Power".to_string(), vec![SheetPinFixture::input("VOUT")]);
        let mut u1 = Component::new(Reference::new("U1"), "Device:R", child_id.clone());
        u1.value = Some("10k".to_string());
        model.contents_mut(&child_id).insert_component(u1);
        let mut net = ksync_model::Net::new(ksync_model::NetName::new("VOUT"), child_id.clone());
        net.pins.insert(PinRef::new(Reference::new("U1"), PinNumber::new("1")));
        model.contents_mut(&child_id).nets.insert(ksync_model::NetName::new("VOUT"), net);

        sync_with_default_resolver(dir.path(), &model, SyncOptions::default());

        // Rename VOUT -> VCC, keeping the same pin membership.
        let mut contents = model.contents.get(&child_id).cloned().unwrap();
        let old_net = contents.nets.remove(&ksync_model::NetName::new("VOUT")).unwrap();
        let mut renamed_net = ksync_model::Net::new(ksync_model::NetName::new("VCC"), child_id.clone());
        renamed_net.pins = old_net.pins;
        contents.nets.insert(ksync_model::NetName::new("VCC"), renamed_net);
        model.contents.insert(child_id.clone(), contents);
        model
            .contents_mut(&root_id)
            .sheet_pins
            .insert("Power".to_string(), vec![SheetPinFixture::input("VCC")]);

        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert!(!report.has_errors(), "{report:?}");
        let child_text = std::fs::read_to_string(dir.path().join("Power.kicad_sch")).unwrap();
        assert!(child_text.contains("VCC"));
        assert!(!child_text.contains("VOUT"));

        let root_index = ksync_kicad::SchematicIndex::load(dir.path().join("widget.kicad_sch")).unwrap();
        let sheet = root_index.find_sheet("Power").unwrap();
        assert!(sheet.pins.iter().any(|p| p.net_name == ksync_model::NetName::new("VCC")));
        assert!(!sheet.pins.iter().any(|p| p.net_name == ksync_model::NetName::new("VOUT")));
    }

    #[test]
    fn idempotency_check_passes_on_a_stable_sync() {
        let (dir, model) = single_resistor_project();
        let options = SyncOptions { verify_idempotent: true, ..Default::default() };
        sync_with_default_resolver(dir.path(), &model, options);
        let report = sync_with_default_resolver(dir.path(), &model, options);
        assert!(!report.has_errors(), "{report:?}");
    }

    #[test]
    fn invalid_hierarchy_is_reported_as_a_single_project_level_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = CircuitModel::new();
        let mut a = Sheet::root("A", "A.kicad_sch");
        let a_id = a.sheet_id.clone();
        let mut b = Sheet::root("B", "B.kicad_sch");
        let b_id = b.sheet_id.clone();
        a.parent_sheet_id = Some(b_id.clone());
        b.parent_sheet_id = Some(a_id.clone());
        a.children.push(b_id.clone());
        b.children.push(a_id.clone());
        model.add_sheet(a);
        model.add_sheet(b);
        model.root = Some(a_id);

        let report = sync_with_default_resolver(dir.path(), &model, SyncOptions::default());
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.sheets.len(), 1);
    }
}
