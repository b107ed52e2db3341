//! Restore files left behind by an interrupted task.
//!
//! A task that dies mid-step (crash, kill, power loss) leaves its journal in
//! place. Recovery replays the journal through the same compensation used by
//! in-process rollback and removes it once every file is restored.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::io::journal::{journal_path, load_journal_if_present, remove_journal};
use crate::task::compensate;

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub goal: String,
    /// Number of journal entries replayed.
    pub entries: usize,
    /// Files that could not be restored; the journal is kept when non-empty.
    pub errors: Vec<String>,
}

impl RecoveryOutcome {
    pub fn complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Replay the journal under `root`, if any.
///
/// Returns `Ok(None)` when there is nothing to recover.
pub fn recover(root: &Path) -> Result<Option<RecoveryOutcome>> {
    let path = journal_path(root);
    let Some(journal) = load_journal_if_present(&path)? else {
        info!("no pending journal");
        return Ok(None);
    };

    info!(goal = %journal.goal, entries = journal.entries.len(), "recovering interrupted task");
    let errors = compensate(&journal.entries);
    if errors.is_empty() {
        remove_journal(&path)?;
    } else {
        warn!(failed = errors.len(), journal = %path.display(), "recovery incomplete, journal kept");
    }

    Ok(Some(RecoveryOutcome {
        goal: journal.goal,
        entries: journal.entries.len(),
        errors,
    }))
}
