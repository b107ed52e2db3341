//! Staged edits and single-file backup/restore.
//!
//! A [`Sandbox`] holds at most one pending edit per file, keyed by the path
//! resolved against its root. Staging a second edit for the same file replaces
//! the first. Each task or caller owns its own sandbox; nothing is shared
//! process-wide.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::diff::diff;
use crate::core::error::GateError;
use crate::core::types::{EditRequest, FileDiff};

/// Suffix appended to a file name to form its backup sibling.
pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    pending: BTreeMap<PathBuf, EditRequest>,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the sandbox root (absolute paths pass through).
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    /// Record `request` as the pending edit for its file and return the diff
    /// against the current on-disk content (empty if the file is missing).
    #[instrument(skip_all, fields(path = %request.file_path.display()))]
    pub fn stage_edit(&mut self, request: EditRequest) -> Result<FileDiff> {
        let abs = self.resolve(&request.file_path);
        let current = read_optional(&abs)?.unwrap_or_default();
        let file_diff = diff(&current, &request.new_content, request.file_path.clone());
        if let Some(previous) = self.pending.insert(abs, request) {
            debug!(reason = %previous.reason, "replaced pending edit");
        }
        Ok(file_diff)
    }

    /// Diff `new_content` against the file on disk without staging anything.
    pub fn preview_edit(&self, path: &Path, new_content: &str) -> Result<FileDiff> {
        let current = read_optional(&self.resolve(path))?.unwrap_or_default();
        Ok(diff(&current, new_content, path))
    }

    /// Write the pending edit for `path` to disk.
    ///
    /// With `require_backup`, an existing file is first copied to its
    /// `.backup` sibling; a missing file simply gets no backup.
    #[instrument(skip_all, fields(path = %path.display(), require_backup))]
    pub fn apply_edit(&mut self, path: &Path, require_backup: bool) -> Result<()> {
        let abs = self.resolve(path);
        let request = self
            .pending
            .get(&abs)
            .ok_or_else(|| GateError::NoStagedEdit {
                path: path.to_path_buf(),
            })?;

        if require_backup {
            match read_optional(&abs)? {
                Some(current) => {
                    let backup = backup_path_for(&abs);
                    fs::write(&backup, current)
                        .with_context(|| format!("write backup {}", backup.display()))?;
                    debug!(backup = %backup.display(), "backup created");
                }
                None => debug!("file does not exist yet, no backup"),
            }
        }

        write_creating_parents(&abs, &request.new_content)?;
        self.pending.remove(&abs);
        debug!("edit applied");
        Ok(())
    }

    /// Drop the pending edit for `path`, if any. Disk is untouched.
    pub fn discard_edit(&mut self, path: &Path) {
        let abs = self.resolve(path);
        if self.pending.remove(&abs).is_some() {
            debug!(path = %path.display(), "pending edit discarded");
        }
    }

    /// Restore `path` from its `.backup` sibling and delete the backup.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn rollback(&mut self, path: &Path) -> Result<()> {
        let abs = self.resolve(path);
        let backup = backup_path_for(&abs);
        let Some(content) = read_optional(&backup)? else {
            warn!("no backup to roll back to");
            return Err(GateError::NoBackupFound {
                path: path.to_path_buf(),
            }
            .into());
        };
        write_creating_parents(&abs, &content)?;
        fs::remove_file(&backup).with_context(|| format!("remove backup {}", backup.display()))?;
        self.pending.remove(&abs);
        debug!("restored from backup");
        Ok(())
    }

    pub fn pending_edit(&self, path: &Path) -> Option<&EditRequest> {
        self.pending.get(&self.resolve(path))
    }

    /// Resolved paths with a pending edit, in sorted order.
    pub fn pending_paths(&self) -> impl Iterator<Item = &Path> {
        self.pending.keys().map(PathBuf::as_path)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// `{path}.backup`, next to `path`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Read a UTF-8 file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

/// Write `contents` to `path`, creating parent directories first.
pub fn write_creating_parents(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// The highest ancestor of `path` that does not exist yet, i.e. the first
/// directory [`write_creating_parents`] would create.
pub fn highest_missing_dir(path: &Path) -> Option<PathBuf> {
    let mut highest = None;
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        highest = Some(dir.to_path_buf());
        current = dir.parent();
    }
    highest
}

/// Remove the now-empty directories between `file` and `created_dir`
/// (inclusive), deepest first. Stops at the first directory that still has
/// entries.
pub fn remove_created_dirs(file: &Path, created_dir: &Path) -> Result<()> {
    let mut current = file.parent();
    while let Some(dir) = current {
        if !dir.starts_with(created_dir) {
            break;
        }
        match fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    debug!(dir = %dir.display(), "directory not empty, keeping it");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                current = dir.parent();
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
        }
        fs::remove_dir(dir).with_context(|| format!("remove directory {}", dir.display()))?;
        debug!(dir = %dir.display(), "removed directory created by edit");
        current = dir.parent();
    }
    Ok(())
}
