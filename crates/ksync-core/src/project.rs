//! Project-file layout conventions (spec §6.4) and the `.kicad_pro`
//! merge-patch: touch only the keys this tool owns, never delete a key it
//! doesn't recognize, and leave the file untouched entirely when nothing
//! changed.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::error::SyncErrorKind;

/// Sanitizes a sheet name into a filesystem-safe `.kicad_sch` stem: ASCII
/// alphanumerics, `_` and `-` pass through, everything else becomes `_`
/// (spec §6.4 "filename = sanitized subcircuit name").
pub fn sanitize_sheet_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "sheet".to_string()
    } else {
        sanitized
    }
}

/// File path for a sheet, relative to the project root. The root sheet
/// always takes the project's own name (spec §6.4
/// "`<project>.kicad_sch` — root sheet"); every other sheet gets its own
/// sanitized file.
pub fn sheet_file_path(project_name: &str, sheet_name: &str, is_root: bool) -> PathBuf {
    if is_root {
        PathBuf::from(format!("{project_name}.kicad_sch"))
    } else {
        PathBuf::from(format!("{}.kicad_sch", sanitize_sheet_filename(sheet_name)))
    }
}

fn default_project_json(project_name: &str) -> Value {
    json!({
        "meta": { "filename": format!("{project_name}.kicad_pro") },
        "sheets": [],
    })
}

/// Rewrites `<project>.kicad_pro`'s `sheets` list to match `sheet_files`
/// (already in DFS order) if and only if it differs from what's on disk.
/// Every other top-level key — board settings, net classes, anything this
/// tool has never heard of — is read back and written out unchanged.
///
/// Returns whether the file was written.
pub fn patch_kicad_pro(path: &Path, project_name: &str, sheet_files: &[String]) -> Result<bool, SyncErrorKind> {
    let io_err = |e: std::io::Error| SyncErrorKind::WriteFailure(path.display().to_string(), e.to_string());

    let mut root: Value = if path.exists() {
        let text = fs::read_to_string(path).map_err(io_err)?;
        serde_json::from_str(&text)
            .map_err(|e| SyncErrorKind::CodecError(format!("{}: {e}", path.display())))?
    } else {
        default_project_json(project_name)
    };

    let current: Vec<String> = root
        .get("sheets")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if current == sheet_files {
        return Ok(false);
    }

    let map = root.as_object_mut().expect("default/parsed project JSON is always an object");
    map.insert("sheets".to_string(), json!(sheet_files));

    let text = serde_json::to_string_pretty(&root).expect("Value serializes infallibly") + "\n";
    fs::write(path, text).map_err(io_err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_non_ascii_sheet_names() {
        assert_eq!(sanitize_sheet_filename("Power Supply"), "Power_Supply");
        assert_eq!(sanitize_sheet_filename("RF/Front-End"), "RF_Front-End");
    }

    #[test]
    fn root_sheet_uses_project_name() {
        assert_eq!(sheet_file_path("widget", "anything", true), PathBuf::from("widget.kicad_sch"));
        assert_eq!(sheet_file_path("widget", "Power Supply", false), PathBuf::from("Power_Supply.kicad_sch"));
    }

    #[test]
    fn patch_is_a_no_op_when_sheet_list_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.kicad_pro");
        let sheets = vec!["widget.kicad_sch".to_string()];
        assert!(patch_kicad_pro(&path, "widget", &sheets).unwrap(), "first write always happens");
        let before = fs::read_to_string(&path).unwrap();
        assert!(!patch_kicad_pro(&path, "widget", &sheets).unwrap(), "unchanged list is a no-op");
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn patch_preserves_unrecognized_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.kicad_pro");
        fs::write(&path, r#"{"meta":{"filename":"widget.kicad_pro"},"sheets":[],"board":{"layers":4}}"#).unwrap();
        patch_kicad_pro(&path, "widget", &["widget.kicad_sch".to_string()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["board"]["layers"], 4);
        assert_eq!(value["sheets"][0], "widget.kicad_sch");
    }
}
