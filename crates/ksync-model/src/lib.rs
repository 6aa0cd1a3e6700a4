//! Canonical Model: the language-neutral circuit IR shared between the
//! declarative front-end, the CAD-side codec, and the synchronization core.
//!
//! Nothing in this crate knows how to read or write a `.kicad_sch` file —
//! that is the codec's job (`ksync-sexpr` / `ksync-kicad`). This crate only
//! defines the vocabulary in spec §3 and the JSON mirror in spec §6.5.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod properties;
pub use properties::Properties;

/// A stable per-project sheet identifier. Round-tripped from CAD when
/// present, generated fresh for sheets introduced only by the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(pub String);

impl SheetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SheetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A component reference designator, e.g. `R1`, `U3`.
///
/// Ordered with natural-sort semantics (`R2` before `R10`) so every view the
/// core builds over components — index iteration, report lines, JSON keys —
/// agrees with how an engineer would read a BOM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(pub String);

impl Reference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        natord::compare(&self.0, &other.0)
    }
}

/// A pin number as printed on the symbol, e.g. `"1"`, `"A14"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinNumber(pub String);

impl PinNumber {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for PinNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(reference, pin_number)` — addresses a single pin of a placed component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub reference: Reference,
    pub pin_number: PinNumber,
}

impl PinRef {
    pub fn new(reference: Reference, pin_number: PinNumber) -> Self {
        Self {
            reference,
            pin_number,
        }
    }
}

impl std::fmt::Display for PinRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.reference, self.pin_number)
    }
}

/// A net name. Local scope is per-sheet (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetName(pub String);

impl NetName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Power nets (GND, VCC, +3V3, ...) render as power-symbol instances
    /// instead of hierarchical labels (spec §4.5). Detected by a small set
    /// of conventional prefixes; a `lib_id` starting with `power:` is the
    /// stronger signal and is checked separately by callers that have a
    /// `Component` in hand.
    pub fn looks_like_power(&self) -> bool {
        let upper = self.0.to_ascii_uppercase();
        upper == "GND"
            || upper == "GNDA"
            || upper == "GNDD"
            || upper.starts_with("VCC")
            || upper.starts_with("VDD")
            || upper.starts_with('+')
    }
}

impl std::fmt::Display for NetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Component placement: position, rotation, mirror state.
///
/// Required once a component is emitted to CAD (spec §3); fresh components
/// receive one from the placement collaborator (`ksync-place`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    #[serde(default)]
    pub mirror: bool,
}

impl Position {
    pub fn new(x: f64, y: f64, rotation: f64) -> Self {
        Self {
            x,
            y,
            rotation,
            mirror: false,
        }
    }

    /// Euclidean distance, used by the matcher's positional tolerance checks
    /// and tie-breaking (spec §4.3).
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// One CAD grid unit (2.54 mm), the default positional-match tolerance.
    pub const DEFAULT_TOLERANCE_MM: f64 = 2.54;

    pub fn within(&self, other: &Position, tolerance_mm: f64) -> bool {
        self.distance(other) <= tolerance_mm
    }
}

/// Standard CAD paper sizes, largest to smallest, used by `ChangePageSize`
/// (spec §4.6, test 68).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PageSize {
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
}

impl PageSize {
    /// Usable dimensions in millimeters, landscape orientation.
    pub const fn dimensions_mm(&self) -> (f64, f64) {
        match self {
            PageSize::A0 => (1189.0, 841.0),
            PageSize::A1 => (841.0, 594.0),
            PageSize::A2 => (594.0, 420.0),
            PageSize::A3 => (420.0, 297.0),
            PageSize::A4 => (297.0, 210.0),
            PageSize::A5 => (210.0, 148.0),
        }
    }

    /// All sizes ordered smallest to largest.
    pub const ASCENDING: [PageSize; 6] = [
        PageSize::A5,
        PageSize::A4,
        PageSize::A3,
        PageSize::A2,
        PageSize::A1,
        PageSize::A0,
    ];

    pub const MARGIN_MM: f64 = 12.7;

    /// Smallest standard size whose usable area (minus margin on every side)
    /// fits a bounding box of `(width_mm, height_mm)`. Falls back to `A0` if
    /// nothing standard fits (callers are expected to warn in that case).
    pub fn smallest_fitting(width_mm: f64, height_mm: f64) -> PageSize {
        for size in Self::ASCENDING {
            let (w, h) = size.dimensions_mm();
            let usable_w = w - 2.0 * Self::MARGIN_MM;
            let usable_h = h - 2.0 * Self::MARGIN_MM;
            if width_mm <= usable_w && height_mm <= usable_h {
                return size;
            }
        }
        PageSize::A0
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One unit of a (possibly multi-unit) component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub reference: Reference,
    pub lib_id: String,
    pub value: Option<String>,
    pub footprint: Option<String>,
    /// `1..=N`, N = symbol unit count. Single-unit symbols are always unit 1.
    pub unit: u32,
    pub position: Option<Position>,
    pub uuid: Option<uuid::Uuid>,
    pub properties: Properties,
    pub sheet_id: SheetId,
}

impl Component {
    pub fn new(reference: Reference, lib_id: impl Into<String>, sheet_id: SheetId) -> Self {
        Self {
            reference,
            lib_id: lib_id.into(),
            value: None,
            footprint: None,
            unit: 1,
            position: None,
            uuid: None,
            properties: Properties::new(),
            sheet_id,
        }
    }

    pub fn is_power_symbol(&self) -> bool {
        self.lib_id.starts_with("power:")
            || self
                .properties
                .get("is_power")
                .is_some_and(|v| v == "true" || v == "1")
    }

    /// Fields compared by the value+footprint/position matcher strategies
    /// (spec §4.3 strategies 4-5): same `lib_id`, `value`, `footprint`.
    pub fn matches_type(&self, other: &Component) -> bool {
        self.lib_id == other.lib_id && self.value == other.value && self.footprint == other.footprint
    }

    /// Any field differs between canonically-updatable fields. Position,
    /// rotation and uuid are excluded — an `UpdateComponent` edit never
    /// touches them (spec §4.4 "field-only canonical update").
    pub fn differs_in_fields(&self, other: &Component) -> bool {
        self.value != other.value
            || self.footprint != other.footprint
            || self.properties != other.properties
            || self.lib_id != other.lib_id
    }
}

/// Hierarchical label direction, inferred from pin function (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelDirection {
    Input,
    Output,
    Bidirectional,
    Passive,
}

impl LabelDirection {
    /// `Passive` pins default to bidirectional labels (spec §4.5).
    pub fn for_pin_function(pin_is_input: bool, pin_is_output: bool) -> Self {
        match (pin_is_input, pin_is_output) {
            (true, false) => LabelDirection::Input,
            (false, true) => LabelDirection::Output,
            (true, true) => LabelDirection::Bidirectional,
            (false, false) => LabelDirection::Bidirectional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalLabel {
    pub net_name: NetName,
    pub direction: LabelDirection,
    pub anchor: PinRef,
    pub uuid: Option<uuid::Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetPin {
    pub net_name: NetName,
    pub direction: LabelDirection,
    pub uuid: Option<uuid::Uuid>,
}

/// A net as declared/observed on a single sheet (spec §3: local net scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: NetName,
    pub sheet_id: SheetId,
    pub pins: BTreeSet<PinRef>,
    pub is_power: bool,
}

impl Net {
    pub fn new(name: NetName, sheet_id: SheetId) -> Self {
        Self {
            name,
            sheet_id,
            pins: BTreeSet::new(),
            is_power: false,
        }
    }
}

/// Opaque CAD node identity: `(node_kind, uuid)` (spec §3). The canonical
/// model only ever carries the identity — the byte content lives in the
/// Schematic Index (`ksync-kicad`), which is the only component allowed to
/// touch it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueBlobId {
    pub node_kind: String,
    pub uuid: uuid::Uuid,
}

/// A node in the declared sheet hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub sheet_id: SheetId,
    pub name: String,
    pub parent_sheet_id: Option<SheetId>,
    pub children: Vec<SheetId>,
    pub page_size: PageSize,
    /// File path relative to the project root (spec §3 "one file path on
    /// disk"; spec §6.4 persisted layout).
    pub path: PathBuf,
}

impl Sheet {
    pub fn root(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            sheet_id: SheetId::generate(),
            name: name.into(),
            parent_sheet_id: None,
            children: Vec::new(),
            page_size: PageSize::A4,
            path: path.into(),
        }
    }
}

/// Everything declared or observed on one sheet: components (keyed by
/// reference, then unit — spec §4.2.1 multi-unit indexing), nets, and the
/// hierarchical labels/sheet pins synthesized or parsed for that sheet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetContents {
    pub components: BTreeMap<Reference, BTreeMap<u32, Component>>,
    pub nets: BTreeMap<NetName, Net>,
    pub labels: Vec<HierarchicalLabel>,
    /// Sheet pins keyed by the name of the *child* sheet they connect to.
    pub sheet_pins: BTreeMap<String, Vec<SheetPin>>,
}

impl SheetContents {
    pub fn insert_component(&mut self, component: Component) {
        self.components
            .entry(component.reference.clone())
            .or_default()
            .insert(component.unit, component);
    }

    /// Lookup by bare reference returns the lowest unit (spec §4.2.1).
    pub fn component_by_reference(&self, reference: &Reference) -> Option<&Component> {
        self.components
            .get(reference)
            .and_then(|units| units.values().next())
    }

    pub fn component(&self, reference: &Reference, unit: u32) -> Option<&Component> {
        self.components.get(reference)?.get(&unit)
    }

    pub fn all_components(&self) -> impl Iterator<Item = &Component> {
        self.components.values().flat_map(|units| units.values())
    }
}

/// Error raised validating the declared sheet hierarchy (spec §7 `CycleInHierarchy`,
/// spec §3 Sheet invariants).
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("declared subcircuit graph is not a tree: cycle involving sheet '{0}'")]
    CycleInHierarchy(String),

    #[error("duplicate sheet name '{0}' (sheet names must be globally unique per-project)")]
    DuplicateSheetName(String),

    #[error("duplicate component reference '{0}' declared on sheets '{1}' and '{2}'")]
    DuplicateReference(String, String, String),

    #[error("sheet '{0}' has no parent and is not the declared root")]
    OrphanSheet(String),
}

/// The full declared (or reconstructed) circuit: a tree of sheets, each with
/// its own components/nets/labels.
#[derive(Debug, Clone, Default)]
pub struct CircuitModel {
    pub root: Option<SheetId>,
    pub sheets: BTreeMap<SheetId, Sheet>,
    pub contents: BTreeMap<SheetId, SheetContents>,
}

impl CircuitModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        if sheet.parent_sheet_id.is_none() {
            self.root = Some(sheet.sheet_id.clone());
        }
        self.contents
            .entry(sheet.sheet_id.clone())
            .or_insert_with(SheetContents::default);
        self.sheets.insert(sheet.sheet_id.clone(), sheet);
    }

    pub fn contents_mut(&mut self, sheet_id: &SheetId) -> &mut SheetContents {
        self.contents.entry(sheet_id.clone()).or_default()
    }

    /// Sheets in DFS order, root first, matching the orchestrator's load
    /// and sync order (spec §4.7).
    pub fn dfs_order(&self) -> Vec<SheetId> {
        let mut order = Vec::new();
        if let Some(root) = &self.root {
            self.dfs_visit(root, &mut order);
        }
        order
    }

    fn dfs_visit(&self, id: &SheetId, out: &mut Vec<SheetId>) {
        out.push(id.clone());
        if let Some(sheet) = self.sheets.get(id) {
            for child in &sheet.children {
                self.dfs_visit(child, out);
            }
        }
    }

    /// Validates the tree invariants from spec §3: no cycles, one root,
    /// globally-unique sheet names, globally-unique component references.
    pub fn validate(&self) -> Result<(), ModelError> {
        let root = self
            .root
            .clone()
            .ok_or_else(|| ModelError::OrphanSheet("<none>".to_string()))?;

        let mut visited = BTreeSet::new();
        self.check_acyclic(&root, &mut visited)?;

        if visited.len() != self.sheets.len() {
            for id in self.sheets.keys() {
                if !visited.contains(id) {
                    return Err(ModelError::OrphanSheet(id.to_string()));
                }
            }
        }

        let mut names = BTreeSet::new();
        for sheet in self.sheets.values() {
            if !names.insert(sheet.name.clone()) {
                return Err(ModelError::DuplicateSheetName(sheet.name.clone()));
            }
        }

        let mut seen_refs: BTreeMap<Reference, SheetId> = BTreeMap::new();
        for (sheet_id, contents) in &self.contents {
            for component in contents.all_components() {
                if let Some(other_sheet) = seen_refs.get(&component.reference) {
                    if other_sheet != sheet_id {
                        return Err(ModelError::DuplicateReference(
                            component.reference.to_string(),
                            other_sheet.to_string(),
                            sheet_id.to_string(),
                        ));
                    }
                } else {
                    seen_refs.insert(component.reference.clone(), sheet_id.clone());
                }
            }
        }

        Ok(())
    }

    fn check_acyclic(
        &self,
        id: &SheetId,
        visited: &mut BTreeSet<SheetId>,
    ) -> Result<(), ModelError> {
        if !visited.insert(id.clone()) {
            return Err(ModelError::CycleInHierarchy(id.to_string()));
        }
        if let Some(sheet) = self.sheets.get(id) {
            for child in &sheet.children {
                self.check_acyclic(child, visited)?;
            }
        }
        Ok(())
    }

    /// Canonical JSON mirror (spec §6.5): keys sorted, floats to 3 decimal
    /// places, emitted after every sync for validation / exchange.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        canonical_json::model_to_json(self)
    }
}

mod canonical_json {
    use super::*;
    use serde_json::{json, Map, Value};

    fn fmt_f64(v: f64) -> Value {
        // 3-decimal formatting keeps diffs stable across runs (spec §6.5);
        // parse back so e.g. `1.000` serializes as `1.0`, not a string.
        let rounded = format!("{v:.3}");
        serde_json::from_str::<f64>(&rounded)
            .map(Value::from)
            .unwrap_or(Value::from(v))
    }

    fn position_json(p: &Position) -> Value {
        json!({
            "x": fmt_f64(p.x),
            "y": fmt_f64(p.y),
            "rotation": fmt_f64(p.rotation),
            "mirror": p.mirror,
        })
    }

    fn component_json(c: &Component) -> Value {
        let mut obj = Map::new();
        obj.insert("lib_id".into(), Value::String(c.lib_id.clone()));
        if let Some(v) = &c.value {
            obj.insert("value".into(), Value::String(v.clone()));
        }
        if let Some(fp) = &c.footprint {
            obj.insert("footprint".into(), Value::String(fp.clone()));
        }
        obj.insert("unit".into(), Value::from(c.unit));
        let mut props = Map::new();
        for (k, v) in c.properties.iter() {
            props.insert(k.clone(), Value::String(v.clone()));
        }
        obj.insert("properties".into(), Value::Object(props));
        if let Some(pos) = &c.position {
            obj.insert("position".into(), position_json(pos));
        }
        Value::Object(obj)
    }

    fn sheet_json(model: &CircuitModel, sheet_id: &SheetId) -> Value {
        let sheet = &model.sheets[sheet_id];
        let contents = model.contents.get(sheet_id).cloned().unwrap_or_default();

        let mut components = Map::new();
        for component in contents.all_components() {
            components.insert(component.reference.to_string(), component_json(component));
        }

        let mut nets = Map::new();
        for (name, net) in &contents.nets {
            let pins: Vec<Value> = net
                .pins
                .iter()
                .map(|p| json!({"ref": p.reference.to_string(), "pin": p.pin_number.to_string()}))
                .collect();
            nets.insert(name.to_string(), json!({ "pins": pins }));
        }

        let subsheets: Vec<Value> = sheet
            .children
            .iter()
            .map(|id| sheet_json(model, id))
            .collect();

        json!({
            "name": sheet.name,
            "sheet_id": sheet.sheet_id.to_string(),
            "parent": sheet.parent_sheet_id.as_ref().map(|p| p.to_string()),
            "components": components,
            "nets": nets,
            "subsheets": subsheets,
        })
    }

    pub fn model_to_json(model: &CircuitModel) -> Value {
        match &model.root {
            Some(root) => sheet_json(model, root),
            None => json!({}),
        }
    }
}
