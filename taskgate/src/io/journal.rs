//! Persisted compensation log (`.taskgate/journal.json`).
//!
//! The in-memory history of a task is mirrored here before each file is first
//! mutated, so a task interrupted by a crash can still be rolled back by
//! `taskgate recover`. The file exists only while a task is running or after a
//! rollback that could not restore every file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::ExecutionHistoryEntry;
use crate::io::config::{STATE_DIR, write_atomic};

/// Bump when the on-disk layout changes.
pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Journal {
    pub version: u32,
    pub goal: String,
    pub cwd: PathBuf,
    /// First-touch snapshots in mutation order; replay in reverse.
    pub entries: Vec<ExecutionHistoryEntry>,
}

impl Journal {
    pub fn new(goal: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            version: JOURNAL_VERSION,
            goal: goal.into(),
            cwd: cwd.into(),
            entries: Vec::new(),
        }
    }
}

/// `<root>/.taskgate/journal.json`.
pub fn journal_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("journal.json")
}

/// Load a journal from disk.
pub fn load_journal(path: &Path) -> Result<Journal> {
    debug!(path = %path.display(), "loading journal");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read journal {}", path.display()))?;
    let journal: Journal = serde_json::from_str(&contents)
        .with_context(|| format!("parse journal {}", path.display()))?;
    if journal.version != JOURNAL_VERSION {
        return Err(anyhow!(
            "unsupported journal version {} in {}",
            journal.version,
            path.display()
        ));
    }
    debug!(entries = journal.entries.len(), "journal loaded");
    Ok(journal)
}

/// Load a journal if the file exists.
pub fn load_journal_if_present(path: &Path) -> Result<Option<Journal>> {
    if !path.exists() {
        return Ok(None);
    }
    load_journal(path).map(Some)
}

/// Atomically write the journal (temp file + rename).
pub fn write_journal(path: &Path, journal: &Journal) -> Result<()> {
    debug!(path = %path.display(), entries = journal.entries.len(), "writing journal");
    let mut buf = serde_json::to_string_pretty(journal).context("serialize journal")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Remove the journal; a missing file is fine.
pub fn remove_journal(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove journal {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = journal_path(temp.path());

        let mut journal = Journal::new("add login", temp.path());
        journal.entries.push(ExecutionHistoryEntry {
            file: temp.path().join("src/auth.js"),
            backup_path: Some(temp.path().join("src/auth.js.backup")),
            original_content: "module.exports = {};\n".to_string(),
            existed: true,
            created_dir: None,
        });
        journal.entries.push(ExecutionHistoryEntry {
            file: temp.path().join("src/login.js"),
            backup_path: None,
            original_content: String::new(),
            existed: false,
            created_dir: None,
        });

        write_journal(&path, &journal).expect("write");
        assert_eq!(load_journal(&path).expect("load"), journal);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_journal_is_none_and_removal_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = journal_path(temp.path());
        assert_eq!(load_journal_if_present(&path).expect("load"), None);
        remove_journal(&path).expect("remove missing");
    }

    #[test]
    fn rejects_unknown_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = journal_path(temp.path());
        let mut journal = Journal::new("goal", temp.path());
        journal.version = 99;
        write_journal(&path, &journal).expect("write");
        let err = load_journal(&path).expect_err("should reject");
        assert!(err.to_string().contains("unsupported journal version"));
    }
}
