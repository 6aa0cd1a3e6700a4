//! Schematic Index: an in-memory, edit-in-place view of one parsed
//! `.kicad_sch` sheet.
//!
//! This is the collaborator the Edit Applier (`ksync-core`) talks to when it
//! walks an `EditPlan` — it never touches raw S-expressions itself. The
//! index parses a sheet once, keeps a [`ksync_sexpr::PatchSet`] of pending
//! byte-range replacements, and exposes one mutation method per primitive
//! CAD-side operation (set a field, rename a reference, insert/remove a
//! symbol, insert/remove a label). Anything the index doesn't recognize —
//! wires, junctions, graphics, the title block — is never read into a typed
//! field and is therefore never a candidate for a patch; it streams through
//! [`SchematicIndex::serialize`] byte-identical.

mod component;
mod label;
mod sheet;

pub use component::{build_fresh_symbol, ComponentNode};
pub use label::{build_fresh_label, build_fresh_sheet_pin, LabelDirectionExt, LabelNode, SheetPinNode};
pub use sheet::{build_fresh_sheet, SheetNode};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ksync_model::{NetName, PageSize, Position, Reference};
use ksync_sexpr::{parse, PatchSet, Sexpr, Span};

#[derive(Debug, thiserror::Error)]
pub enum KicadError {
    #[error("failed to read '{0}': {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse '{0}': {1}")]
    Parse(PathBuf, ksync_sexpr::ParseError),

    #[error("sheet has no top-level (kicad_sch ...) node")]
    NotASchematic,

    #[error("component {0} unit {1} not found in this sheet")]
    NoSuchComponent(Reference, u32),

    #[error("hierarchical label '{0}' not found in this sheet")]
    NoSuchLabel(NetName),

    #[error("(paper ...) node missing from sheet")]
    NoPaperNode,

    #[error("child sheet '{0}' not found on this sheet")]
    NoSuchSheet(String),
}

/// One field of a component that the Edit Applier can update in place
/// without touching position, rotation or uuid (spec §4.4 "field-only
/// canonical update").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentField {
    Value,
    Footprint,
    Property(String),
}

/// A parsed `.kicad_sch` sheet plus the accumulated edits not yet written
/// back to disk.
pub struct SchematicIndex {
    path: PathBuf,
    source: String,
    root: Sexpr,
    patches: PatchSet,
    insertion_point: usize,
    components: BTreeMap<(Reference, u32), ComponentNode>,
    labels: Vec<LabelNode>,
    sheets: Vec<SheetNode>,
    opaque_blob_count: usize,
    /// `(sheet ...)` nodes added this pass, keyed by name, held as live trees
    /// rather than queued text so a pin added to one of them later in the
    /// same pass (`insert_sheet_pin`) can still be nested inside it — a
    /// sheet that has no real span yet can't be targeted by a span patch.
    /// Flushed into `patches` at serialize time.
    pending_sheets: Vec<(String, Sexpr)>,
}

impl SchematicIndex {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KicadError> {
        let path = path.into();
        let source = fs::read_to_string(&path).map_err(|e| KicadError::Io(path.clone(), e))?;
        Self::parse_source(path, source)
    }

    pub fn parse_source(path: PathBuf, source: String) -> Result<Self, KicadError> {
        let root = parse(&source).map_err(|e| KicadError::Parse(path.clone(), e))?;
        let items = root.as_list().ok_or(KicadError::NotASchematic)?;
        if items.first().and_then(Sexpr::as_sym) != Some("kicad_sch") {
            return Err(KicadError::NotASchematic);
        }

        let insertion_point = root.span.end.saturating_sub(1);
        let mut components = BTreeMap::new();
        let mut labels = Vec::new();
        let mut sheets = Vec::new();
        let mut opaque_blob_count = 0;

        for item in items.iter().skip(1) {
            let Some(list) = item.as_list() else { continue };
            match list.first().and_then(Sexpr::as_sym) {
                Some("symbol") => {
                    if let Some(node) = component::extract(item.span, list) {
                        components.insert((node.reference.clone(), node.unit), node);
                    }
                }
                Some("hierarchical_label") => {
                    if let Some(node) = label::extract_hierarchical_label(item.span, list) {
                        labels.push(node);
                    }
                }
                Some("sheet") => {
                    if let Some(node) = sheet::extract(item.span, list) {
                        sheets.push(node);
                    }
                }
                Some(tag) if ksync_sexpr::kicad::is_structural_tag(tag) => {}
                _ => opaque_blob_count += 1,
            }
        }

        Ok(Self {
            path,
            source,
            root,
            patches: PatchSet::new(),
            insertion_point,
            components,
            labels,
            sheets,
            opaque_blob_count,
            pending_sheets: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentNode> {
        self.components.values()
    }

    /// Bare-reference lookup returns the lowest unit (mirrors spec §4.2.1's
    /// model-level contract).
    pub fn find_by_reference(&self, reference: &Reference) -> Option<&ComponentNode> {
        self.components
            .range((reference.clone(), 0)..=(reference.clone(), u32::MAX))
            .map(|(_, node)| node)
            .next()
    }

    pub fn find_component(&self, reference: &Reference, unit: u32) -> Option<&ComponentNode> {
        self.components.get(&(reference.clone(), unit))
    }

    pub fn find_by_position(&self, position: &Position, tolerance_mm: f64) -> Vec<&ComponentNode> {
        self.components
            .values()
            .filter(|c| c.position.within(position, tolerance_mm))
            .collect()
    }

    pub fn labels(&self) -> &[LabelNode] {
        &self.labels
    }

    pub fn sheets(&self) -> &[SheetNode] {
        &self.sheets
    }

    pub fn find_sheet(&self, name: &str) -> Option<&SheetNode> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn opaque_blob_count(&self) -> usize {
        self.opaque_blob_count
    }

    pub fn pending_patch_count(&self) -> usize {
        self.patches.len() + self.pending_sheets.len()
    }

    // --- mutations --------------------------------------------------------

    /// Field-only canonical update: patches exactly the property's value
    /// text, never position/rotation/uuid (spec §4.4).
    pub fn set_component_field(
        &mut self,
        reference: &Reference,
        unit: u32,
        field: ComponentField,
        value: &str,
    ) -> Result<(), KicadError> {
        let node = self
            .components
            .get_mut(&(reference.clone(), unit))
            .ok_or_else(|| KicadError::NoSuchComponent(reference.clone(), unit))?;

        let span = match &field {
            ComponentField::Value => node.value_span,
            ComponentField::Footprint => node.footprint_span,
            ComponentField::Property(name) => node.property_spans.get(name).copied(),
        };

        match span {
            Some(span) => self.patches.replace_string(span, value),
            None => {
                let prop_name = match &field {
                    ComponentField::Value => "Value",
                    ComponentField::Footprint => "Footprint",
                    ComponentField::Property(name) => name.as_str(),
                };
                let insert_at = node.symbol_span.end.saturating_sub(1);
                let text = format!(
                    "\n    (property \"{prop_name}\" \"{value}\" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))\n  "
                );
                self.patches.replace_raw(Span::new(insert_at, insert_at), text);
            }
        }

        match field {
            ComponentField::Value => node.value = Some(value.to_string()),
            ComponentField::Footprint => node.footprint = Some(value.to_string()),
            ComponentField::Property(name) => {
                node.properties.insert(name, value.to_string());
            }
        }
        Ok(())
    }

    /// Patches only the Reference property's text — position, uuid and
    /// every other field of this symbol are untouched.
    pub fn rename_component(
        &mut self,
        old: &Reference,
        new: Reference,
        unit: u32,
    ) -> Result<(), KicadError> {
        let mut node = self
            .components
            .remove(&(old.clone(), unit))
            .ok_or_else(|| KicadError::NoSuchComponent(old.clone(), unit))?;
        self.patches.replace_string(node.reference_span, new.as_str());
        node.reference = new.clone();
        self.components.insert((new, unit), node);
        Ok(())
    }

    /// Appends a freshly-formatted `(symbol ...)` node just before the
    /// sheet's closing paren. Position must already be resolved (by
    /// `ksync-place` for brand-new components).
    pub fn insert_component(&mut self, built: Sexpr, node: ComponentNode) {
        let text = format!("\n  {}\n", ksync_sexpr::format_sexpr(&built, 1).trim_start());
        self.patches
            .replace_raw(Span::new(self.insertion_point, self.insertion_point), text);
        self.components.insert((node.reference.clone(), node.unit), node);
    }

    pub fn remove_component(&mut self, reference: &Reference, unit: u32) -> Result<(), KicadError> {
        let node = self
            .components
            .remove(&(reference.clone(), unit))
            .ok_or_else(|| KicadError::NoSuchComponent(reference.clone(), unit))?;
        let span = extend_to_line_start(&self.source, node.symbol_span);
        self.patches.replace_raw(span, String::new());
        Ok(())
    }

    pub fn insert_hierarchical_label(&mut self, built: Sexpr, node: LabelNode) {
        let text = format!("\n  {}\n", ksync_sexpr::format_sexpr(&built, 1).trim_start());
        self.patches
            .replace_raw(Span::new(self.insertion_point, self.insertion_point), text);
        self.labels.push(node);
    }

    /// Patches only the label's net-name text (spec §4.5 net rename without
    /// touching the anchor it's attached to).
    pub fn rename_hierarchical_label(&mut self, old: &NetName, new: NetName) -> Result<(), KicadError> {
        let pos = self
            .labels
            .iter()
            .position(|l| &l.net_name == old)
            .ok_or_else(|| KicadError::NoSuchLabel(old.clone()))?;
        self.patches.replace_string(self.labels[pos].name_span, &new.0);
        self.labels[pos].net_name = new;
        Ok(())
    }

    pub fn remove_hierarchical_label(&mut self, net_name: &NetName) -> Result<(), KicadError> {
        let pos = self
            .labels
            .iter()
            .position(|l| &l.net_name == net_name)
            .ok_or_else(|| KicadError::NoSuchLabel(net_name.clone()))?;
        let node = self.labels.remove(pos);
        let span = extend_to_line_start(&self.source, node.span);
        self.patches.replace_raw(span, String::new());
        Ok(())
    }

    /// Stages a freshly-formatted `(sheet ...)` node (spec §4.7 sheet
    /// additions). Held in `pending_sheets` rather than patched immediately
    /// — the node's span stays synthetic until a real sync round-trips
    /// through disk, and `insert_sheet_pin` needs a live tree to nest into
    /// if the same boundary gets pins later in this pass.
    pub fn insert_sheet(&mut self, built: Sexpr, node: SheetNode) {
        self.pending_sheets.push((node.name.clone(), built));
        self.sheets.push(node);
    }

    /// Removes a child sheet's `(sheet ...)` instance. Spec §4.7 requires
    /// this only run after the child's own file has been deleted, so by the
    /// time this is called the sheet pins it carried are already orphaned.
    pub fn remove_sheet(&mut self, name: &str) -> Result<(), KicadError> {
        let pos = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| KicadError::NoSuchSheet(name.to_string()))?;
        let node = self.sheets.remove(pos);
        if node.span.is_synthetic() {
            self.pending_sheets.retain(|(n, _)| n != &node.name);
        } else {
            let span = extend_to_line_start(&self.source, node.span);
            self.patches.replace_raw(span, String::new());
        }
        Ok(())
    }

    /// Appends a fresh sheet pin to `sheet_name`'s `(sheet ...)` instance —
    /// the parent-side counterpart of `insert_hierarchical_label` (spec §4.5
    /// boundary propagation). A sheet added earlier in this same pass has no
    /// real span to splice into yet, so its pin is nested directly into the
    /// staged tree in `pending_sheets` instead of patched by byte offset.
    pub fn insert_sheet_pin(
        &mut self,
        sheet_name: &str,
        built: Sexpr,
        node: SheetPinNode,
    ) -> Result<(), KicadError> {
        let pos = self
            .sheets
            .iter()
            .position(|s| s.name == sheet_name)
            .ok_or_else(|| KicadError::NoSuchSheet(sheet_name.to_string()))?;

        if self.sheets[pos].span.is_synthetic() {
            let (_, pending) = self
                .pending_sheets
                .iter_mut()
                .find(|(n, _)| n == sheet_name)
                .expect("a sheet with a synthetic span was staged by insert_sheet, not parsed");
            pending
                .as_list_mut()
                .expect("a built (sheet ...) node is always a list")
                .push(built);
        } else {
            let insertion_point = self.sheets[pos].span.end.saturating_sub(1);
            let text = format!("\n    {}\n  ", ksync_sexpr::format_sexpr(&built, 2).trim_start());
            self.patches.replace_raw(Span::new(insertion_point, insertion_point), text);
        }
        self.sheets[pos].pins.push(node);
        Ok(())
    }

    pub fn remove_sheet_pin(&mut self, sheet_name: &str, net_name: &NetName) -> Result<(), KicadError> {
        let sheet_pos = self
            .sheets
            .iter()
            .position(|s| s.name == sheet_name)
            .ok_or_else(|| KicadError::NoSuchSheet(sheet_name.to_string()))?;
        let pin_pos = self.sheets[sheet_pos]
            .pins
            .iter()
            .position(|p| &p.net_name == net_name)
            .ok_or_else(|| KicadError::NoSuchLabel(net_name.clone()))?;
        let pin = self.sheets[sheet_pos].pins.remove(pin_pos);
        let span = extend_to_line_start(&self.source, pin.span);
        self.patches.replace_raw(span, String::new());
        Ok(())
    }

    /// Patches only a sheet pin's net-name text, mirroring
    /// `rename_hierarchical_label` on the child side of the same boundary.
    pub fn rename_sheet_pin(
        &mut self,
        sheet_name: &str,
        old: &NetName,
        new: NetName,
    ) -> Result<(), KicadError> {
        let sheet_pos = self
            .sheets
            .iter()
            .position(|s| s.name == sheet_name)
            .ok_or_else(|| KicadError::NoSuchSheet(sheet_name.to_string()))?;
        let pin_pos = self.sheets[sheet_pos]
            .pins
            .iter()
            .position(|p| &p.net_name == old)
            .ok_or_else(|| KicadError::NoSuchLabel(old.clone()))?;
        self.patches
            .replace_string(self.sheets[sheet_pos].pins[pin_pos].name_span, &new.0);
        self.sheets[sheet_pos].pins[pin_pos].net_name = new;
        Ok(())
    }

    pub fn set_page_size(&mut self, size: PageSize) -> Result<(), KicadError> {
        let items = self.root.as_list().ok_or(KicadError::NotASchematic)?;
        let paper = ksync_sexpr::find_child_list(items, "paper").ok_or(KicadError::NoPaperNode)?;
        let span = paper.get(1).map(|v| v.span).ok_or(KicadError::NoPaperNode)?;
        self.patches.replace_string(span, &size.to_string());
        Ok(())
    }

    /// Renders the sheet with every pending patch applied. Returns the
    /// original bytes untouched (not merely byte-equal — the same
    /// allocation path) when nothing was edited, so a no-op sync is
    /// trivially idempotent.
    pub fn serialize(&self) -> Vec<u8> {
        if self.patches.is_empty() && self.pending_sheets.is_empty() {
            return self.source.clone().into_bytes();
        }
        let mut patches = self.patches.clone();
        for (_, built) in &self.pending_sheets {
            let text = format!("\n  {}\n", ksync_sexpr::format_sexpr(built, 1).trim_start());
            patches.replace_raw(Span::new(self.insertion_point, self.insertion_point), text);
        }
        let mut buf = Vec::new();
        patches
            .write_to(&self.source, &mut buf)
            .expect("writing to an in-memory buffer is infallible");
        buf
    }

    /// Writes the sheet to `path` atomically: a temp file in the same
    /// directory, flushed and renamed into place, so a crash mid-write never
    /// leaves a truncated `.kicad_sch` behind.
    pub fn write_atomic(&self, path: &Path) -> Result<(), KicadError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| KicadError::Io(path.to_path_buf(), e))?;
        tmp.write_all(&self.serialize())
            .map_err(|e| KicadError::Io(path.to_path_buf(), e))?;
        tmp.flush().map_err(|e| KicadError::Io(path.to_path_buf(), e))?;
        tmp.persist(path)
            .map_err(|e| KicadError::Io(path.to_path_buf(), e.error))?;
        Ok(())
    }
}

/// Extends `span` backward over leading indentation and, if the line is
/// otherwise blank, the preceding newline too — so deleting a node doesn't
/// leave a dangling blank line behind.
fn extend_to_line_start(source: &str, span: Span) -> Span {
    let bytes = source.as_bytes();
    let mut start = span.start;
    while start > 0 && (bytes[start - 1] == b' ' || bytes[start - 1] == b'\t') {
        start -= 1;
    }
    if start > 0 && bytes[start - 1] == b'\n' {
        start -= 1;
    }
    Span::new(start, span.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"(kicad_sch (version 20231120) (uuid "root")
  (paper "A4")
  (symbol (lib_id "Device:R") (at 50.8 50.8 0) (unit 1) (uuid "c1")
    (property "Reference" "R1" (at 0 0 0))
    (property "Value" "10k" (at 0 0 0))
    (property "Footprint" "" (at 0 0 0)))
  (wire (pts (xy 0 0) (xy 1 1)))
  (hierarchical_label "DATA" (shape input) (at 10 10 0) (uuid "lbl1"))
  (sheet (at 100 0) (uuid "sh1")
    (property "Sheetname" "Power")
    (property "Sheetfile" "power.kicad_sch")
    (pin "VCC" input (at 0 0 0) (uuid "p1")))
)
"#;

    #[test]
    fn loads_components_labels_and_opaque_blobs() {
        let idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        assert_eq!(idx.components().count(), 1);
        assert_eq!(idx.labels().len(), 1);
        assert_eq!(idx.opaque_blob_count(), 1, "the lone (wire ...) node is opaque");
    }

    #[test]
    fn update_field_leaves_position_and_wire_byte_stable() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        idx.set_component_field(&Reference::new("R1"), 1, ComponentField::Value, "22k")
            .unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(out.contains(r#"(property "Value" "22k" (at 0 0 0))"#));
        assert!(out.contains("(at 50.8 50.8 0)"));
        assert!(out.contains("(wire (pts (xy 0 0) (xy 1 1)))"));
    }

    #[test]
    fn rename_patches_only_reference_text() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        idx.rename_component(&Reference::new("R1"), Reference::new("R2"), 1).unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(out.contains(r#"(property "Reference" "R2" (at 0 0 0))"#));
        assert!(idx.find_by_reference(&Reference::new("R2")).is_some());
        assert!(idx.find_by_reference(&Reference::new("R1")).is_none());
    }

    #[test]
    fn no_edits_round_trips_byte_identical() {
        let idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        assert_eq!(String::from_utf8(idx.serialize()).unwrap(), SAMPLE);
    }

    #[test]
    fn remove_component_drops_its_block_and_blank_line() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        idx.remove_component(&Reference::new("R1"), 1).unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(!out.contains("Device:R"));
        assert!(out.contains("(wire (pts (xy 0 0) (xy 1 1)))"));
    }

    #[test]
    fn insert_and_remove_sheet_pin_leave_the_rest_of_the_sheet_node_untouched() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        let (built, node) = build_fresh_sheet_pin(&NetName::new("DATA"), ksync_model::LabelDirection::Input);
        idx.insert_sheet_pin("Power", built, node).unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(out.contains(r#"(pin "VCC""#));
        assert!(out.contains(r#"(pin "DATA""#));

        idx.remove_sheet_pin("Power", &NetName::new("VCC")).unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(!out.contains(r#"(pin "VCC""#));
        assert!(out.contains(r#"(pin "DATA""#));
        assert!(out.contains("\"Power\""), "sheet name and file untouched by pin edits");
    }

    #[test]
    fn rename_sheet_pin_patches_only_its_net_name() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        idx.rename_sheet_pin("Power", &NetName::new("VCC"), NetName::new("VDD")).unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(out.contains(r#"(pin "VDD" input"#));
        assert!(out.contains("(uuid \"p1\")"));
    }

    #[test]
    fn a_pin_added_to_a_sheet_created_in_the_same_pass_nests_inside_it() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        let (sheet_built, sheet_node) = build_fresh_sheet("Analog", "analog.kicad_sch");
        idx.insert_sheet(sheet_built, sheet_node);
        let (pin_built, pin_node) = build_fresh_sheet_pin(&NetName::new("VOUT"), ksync_model::LabelDirection::Output);
        idx.insert_sheet_pin("Analog", pin_built, pin_node).unwrap();

        let out = String::from_utf8(idx.serialize()).unwrap();
        let reloaded = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), out).unwrap();
        let sheet = reloaded.find_sheet("Analog").expect("sheet survives the round trip");
        assert_eq!(sheet.pins.len(), 1);
        assert_eq!(sheet.pins[0].net_name, NetName::new("VOUT"));
        assert_eq!(reloaded.sheets().len(), 2, "the pre-existing Power sheet is untouched");
    }

    #[test]
    fn insert_and_remove_sheet_round_trip() {
        let mut idx = SchematicIndex::parse_source(PathBuf::from("root.kicad_sch"), SAMPLE.to_string()).unwrap();
        let (built, node) = build_fresh_sheet("Analog", "analog.kicad_sch");
        idx.insert_sheet(built, node);
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(out.contains("\"Analog\""));
        assert!(idx.find_sheet("Analog").is_some());

        idx.remove_sheet("Power").unwrap();
        let out = String::from_utf8(idx.serialize()).unwrap();
        assert!(!out.contains("\"Power\""));
        assert!(out.contains("\"Analog\""));
    }
}
