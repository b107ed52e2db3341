//! Shared data model for the execution core.
//!
//! These types are the stable output contract consumed by callers (CLI, diff
//! viewers). They carry no behavior beyond small accessors and serialize
//! deterministically.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A request to stage new content for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub file_path: PathBuf,
    pub new_content: String,
    pub reason: String,
}

impl EditRequest {
    pub fn new(
        file_path: impl Into<PathBuf>,
        new_content: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            new_content: new_content.into(),
            reason: reason.into(),
        }
    }
}

/// Per-diff line counters.
///
/// `modified` counts paired removal+addition lines, not the lines inside them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChanges {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl LineChanges {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

/// Structural diff between two versions of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file_path: PathBuf,
    pub old_content: String,
    pub new_content: String,
    pub unified_diff_text: String,
    pub line_changes: LineChanges,
}

/// Operation a step performs on its target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Edit,
    Create,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Edit => "edit",
            Operation::Create => "create",
            Operation::Delete => "delete",
        }
    }
}

/// Compensation record for the first mutation of a file within one task.
///
/// `backup_path` is `None` when the file did not exist before the task, in
/// which case `original_content` is empty and rollback deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub file: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub original_content: String,
    pub existed: bool,
    /// Highest ancestor directory of a new file that did not exist either.
    /// Rollback removes it (and everything below it on the way up) when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_dir: Option<PathBuf>,
}

/// Outcome of one test-suite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    /// Combined stdout followed by stderr.
    pub output: String,
    pub error: Option<String>,
    /// `None` when the process was killed (timeout, cancellation, signal).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// How a single planned step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Applied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// 1-indexed position in the plan.
    pub index: usize,
    pub description: String,
    pub target: Option<PathBuf>,
    pub operation: Operation,
    pub status: StepStatus,
}

/// Terminal summary of one task.
///
/// `rollback_performed` is true only when a rollback ran and every file was
/// restored. Callers must check it before assuming the tree is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub files_modified: Vec<PathBuf>,
    pub error: Option<String>,
    pub rollback_performed: bool,
    pub rollback_errors: Vec<String>,
    /// Journal or backup cleanup that failed after the outcome was decided.
    /// A journal named here must be deleted, not recovered.
    #[serde(default)]
    pub cleanup_errors: Vec<String>,
    pub steps: Vec<StepReport>,
}

impl ExecutionResult {
    /// True when the task failed and rollback left files unrestored.
    pub fn rollback_incomplete(&self) -> bool {
        !self.success && !self.rollback_errors.is_empty()
    }
}
