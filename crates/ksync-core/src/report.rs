//! `SyncReport`: the ordered, per-sheet account of a sync run returned at
//! the `sync()` boundary (spec §6.3) — one report per sheet, each
//! accumulating its own added/updated/renamed/deleted components and
//! label changes alongside warnings and errors.

use serde::Serialize;

use ksync_model::{NetName, Reference};

use crate::error::SyncIssue;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Rebuild every sheet from scratch instead of matching against the
    /// on-disk file. Mostly useful for tests and first-time project
    /// generation; everyday syncs leave this false.
    pub force_regenerate: bool,
    /// Reserved for a future PCB-side sync; this synchronizer only ever
    /// touches `.kicad_sch`/`.kicad_pro`, so setting it has no effect yet.
    pub generate_pcb: bool,
    /// Escalates every recoverable warning to an error for this run.
    pub strict: bool,
    /// After applying, re-run Matcher + Reconciler and assert the resulting
    /// plan is empty (spec §4.7 idempotency invariant). Off by default so a
    /// release build doesn't pay for the second pass on every sync.
    pub verify_idempotent: bool,
}

/// What happened on one sheet during a sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetReport {
    pub sheet_name: String,
    pub added: Vec<Reference>,
    pub updated: Vec<Reference>,
    pub renamed: Vec<(Reference, Reference)>,
    pub deleted: Vec<Reference>,
    pub labels_added: Vec<NetName>,
    pub labels_removed: Vec<NetName>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SheetReport {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, issue: SyncIssue) {
        let text = issue.to_string();
        if issue.is_error {
            self.errors.push(text);
        } else {
            self.warnings.push(text);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.renamed.is_empty()
            && self.deleted.is_empty()
            && self.labels_added.is_empty()
            && self.labels_removed.is_empty()
    }
}

/// The full, ordered result of one `sync()` call: one `SheetReport` per
/// sheet, in the same DFS order the orchestrator loaded them in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sheets: Vec<SheetReport>,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        self.sheets.iter().any(|s| !s.errors.is_empty())
    }

    pub fn has_warnings(&self) -> bool {
        self.sheets.iter().any(|s| !s.warnings.is_empty())
    }

    /// `0` success, `1` warnings (strict off), `2` errors (spec §7).
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            2
        } else if self.has_warnings() {
            1
        } else {
            0
        }
    }
}
