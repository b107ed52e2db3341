//! Error kinds surfaced by the execution core.
//!
//! Functions return `anyhow::Result`; the kinds below are carried inside the
//! `anyhow::Error` so callers can branch with `err.downcast_ref::<GateError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// `apply_edit` was called for a path with nothing staged.
    #[error("no staged edit for {}", path.display())]
    NoStagedEdit { path: PathBuf },

    /// `rollback` was called but `{path}.backup` does not exist.
    #[error("no backup found for {}", path.display())]
    NoBackupFound { path: PathBuf },

    /// A step names no file and its operation cannot be skipped.
    #[error("cannot resolve a target file for step '{step}'")]
    UnresolvableStepTarget { step: String },

    /// A step target escapes the project directory.
    #[error("step target {} is outside the project", path.display())]
    PathOutsideProject { path: PathBuf },

    /// The test command exceeded its timeout.
    #[error("test run timed out after {timeout_secs}s")]
    TestTimeout { timeout_secs: u64 },

    /// The test output contained failure indicators.
    #[error("tests failed: {summary}")]
    TestFailure { summary: String },

    /// A compensating restore or delete failed.
    #[error("rollback of {} failed: {reason}", path.display())]
    RollbackFailed { path: PathBuf, reason: String },

    /// A `.backup` sibling already exists where a fresh snapshot must go.
    #[error("stray backup {} already exists (run `taskgate recover` or remove it)", path.display())]
    StrayBackup { path: PathBuf },

    /// The cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Return the [`GateError`] kind carried by `err`, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&GateError> {
    err.chain().find_map(|cause| cause.downcast_ref::<GateError>())
}
