//! Error kinds surfaced by a sync run, and the recoverable/fatal split that
//! decides whether they become a warning or abort the current sheet's plan.

use std::fmt;

/// One tagged error kind from the error-handling design. `Recovered` kinds
/// the orchestrator itself downgrades to a warning before they ever reach a
/// caller; the rest abort the sheet they occurred on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncErrorKind {
    #[error("duplicate reference '{0}'")]
    DuplicateReference(String),

    #[error("symbol '{0}' not found by the library resolver")]
    UnknownSymbol(String),

    #[error("rename target '{0}' already exists")]
    RenameConflict(String),

    #[error("ambiguous match for {0}: {1} candidates, picked closest/lowest")]
    AmbiguousMatch(String, usize),

    #[error("label '{0}' has no matching requirement and was removed")]
    OrphanLabel(String),

    #[error("declared subcircuit graph is not a tree: cycle involving sheet '{0}'")]
    CycleInHierarchy(String),

    #[error("CAD file is malformed: {0}")]
    CodecError(String),

    #[error("failed to write '{0}': {1}")]
    WriteFailure(String, String),
}

impl SyncErrorKind {
    /// Whether the core can recover from this on its own (tie-break,
    /// delete-the-orphan) and merely warn, versus abort the sheet's plan.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncErrorKind::AmbiguousMatch(..) | SyncErrorKind::OrphanLabel(_))
    }
}

/// One reported issue, already classified as a warning or an error for a
/// given run (a recoverable kind becomes an error instead when
/// `options.strict` is set).
#[derive(Debug, Clone)]
pub struct SyncIssue {
    pub kind: SyncErrorKind,
    pub is_error: bool,
}

impl SyncIssue {
    pub fn new(kind: SyncErrorKind, strict: bool) -> Self {
        let is_error = strict || !kind.is_recoverable();
        Self { kind, is_error }
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
