//! Multi-step task orchestration with compensating rollback.
//!
//! A task moves through `Planning -> Executing(step) -> {Completed | RolledBack}`.
//! Steps run strictly in order and every mutating step is followed by a test
//! run; step N+1 never starts before step N has been validated. Before a file
//! is first mutated its original state is appended to the task history (and
//! the on-disk journal). On any failure the history is replayed in reverse to
//! put every touched file back.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::error::GateError;
use crate::core::path::confine;
use crate::core::resolve::resolve_step;
use crate::core::types::{
    EditRequest, ExecutionHistoryEntry, ExecutionResult, Operation, StepReport, StepStatus,
};
use crate::io::collaborators::{ContentGenerator, Planner};
use crate::io::config::TaskgateConfig;
use crate::io::gate::{DEFAULT_TEST_TIMEOUT, TestRunner, failure_kind};
use crate::io::journal::{
    Journal, journal_path, load_journal_if_present, remove_journal, write_journal,
};
use crate::io::process::CancelToken;
use crate::io::sandbox::{
    Sandbox, backup_path_for, highest_missing_dir, read_optional, remove_created_dirs,
    write_creating_parents,
};

/// What to do and where.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub goal: String,
    pub cwd: PathBuf,
}

impl TaskRequest {
    pub fn new(goal: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            goal: goal.into(),
            cwd: cwd.into(),
        }
    }
}

/// Per-task settings.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Bound on each post-step test run.
    pub test_timeout: Duration,
    /// Where to persist the compensation log; `None` keeps it in memory only.
    pub journal_path: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            test_timeout: DEFAULT_TEST_TIMEOUT,
            journal_path: None,
        }
    }
}

impl TaskConfig {
    pub fn from_config(cfg: &TaskgateConfig, root: &Path) -> Self {
        Self {
            test_timeout: cfg.gate.timeout(),
            journal_path: cfg.journal.enabled.then(|| journal_path(root)),
        }
    }
}

/// Runs planned steps against a project, validating after each one.
///
/// Collaborators are borrowed so callers keep ownership; the sandbox is
/// injected explicitly and must not be shared with a concurrent task.
pub struct TaskExecutor<'a, P, G, T> {
    planner: &'a P,
    generator: &'a G,
    tests: &'a T,
    sandbox: &'a mut Sandbox,
    config: TaskConfig,
    cancel: CancelToken,
}

/// Mutable bookkeeping for one `execute_task` call.
struct TaskRun {
    history: Vec<ExecutionHistoryEntry>,
    files_modified: Vec<PathBuf>,
    reports: Vec<StepReport>,
    journal: Option<(PathBuf, Journal)>,
}

impl TaskRun {
    fn touched(&self, file: &Path) -> bool {
        self.history.iter().any(|entry| entry.file == file)
    }

    /// Persist first, then remember: a crash after this point can still be undone.
    fn record(&mut self, entry: ExecutionHistoryEntry) -> Result<()> {
        if let Some((path, journal)) = &mut self.journal {
            journal.entries.push(entry.clone());
            write_journal(path, journal)?;
        }
        self.history.push(entry);
        Ok(())
    }

    fn note_modified(&mut self, rel: &Path) {
        if !self.files_modified.iter().any(|p| p == rel) {
            self.files_modified.push(rel.to_path_buf());
        }
    }
}

impl<'a, P, G, T> TaskExecutor<'a, P, G, T>
where
    P: Planner,
    G: ContentGenerator,
    T: TestRunner,
{
    pub fn new(
        planner: &'a P,
        generator: &'a G,
        tests: &'a T,
        sandbox: &'a mut Sandbox,
        config: TaskConfig,
    ) -> Self {
        Self {
            planner,
            generator,
            tests,
            sandbox,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Checked before every step and passed to every test run.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plan `request.goal` and execute every step, rolling back on failure.
    ///
    /// Returns `Err` only when nothing was touched (planning failed, or a
    /// journal from an interrupted task is still pending). Step failures are
    /// reported through [`ExecutionResult`].
    #[instrument(skip_all, fields(goal = %request.goal))]
    pub fn execute_task(&mut self, request: &TaskRequest) -> Result<ExecutionResult> {
        let journal = match &self.config.journal_path {
            Some(path) => {
                // An emptied journal is what a failed cleanup leaves behind.
                if load_journal_if_present(path)?.is_some_and(|j| !j.entries.is_empty()) {
                    return Err(anyhow!(
                        "pending journal {} from an interrupted task (run `taskgate recover`)",
                        path.display()
                    ));
                }
                Some((path.clone(), Journal::new(&request.goal, &request.cwd)))
            }
            None => None,
        };

        info!("planning");
        let steps = self.planner.plan(&request.goal).context("plan goal")?;
        let total_steps = steps.len();
        info!(total_steps, "plan ready");

        let mut run = TaskRun {
            history: Vec::new(),
            files_modified: Vec::new(),
            reports: Vec::with_capacity(total_steps),
            journal,
        };
        let mut steps_completed = 0;

        for (offset, description) in steps.iter().enumerate() {
            let index = offset + 1;
            if let Err(err) = self.execute_step(&mut run, &request.cwd, index, description) {
                error!(step = index, err = %format!("{err:#}"), "step failed, rolling back");
                let rollback_errors = self.roll_back(&run);
                let mut cleanup_errors = Vec::new();
                if rollback_errors.is_empty() {
                    cleanup_errors.extend(finish_journal(&run));
                }
                return Ok(ExecutionResult {
                    success: false,
                    steps_completed,
                    total_steps,
                    files_modified: run.files_modified,
                    error: Some(format!("step {index} ({description}) failed: {err:#}")),
                    rollback_performed: rollback_errors.is_empty(),
                    rollback_errors,
                    cleanup_errors,
                    steps: run.reports,
                });
            }
            steps_completed += 1;
        }

        // The journal goes first: once it is gone nothing can undo the task,
        // and a leftover backup only blocks the next run on that file.
        let cleanup_errors = match finish_journal(&run) {
            Some(err) => vec![err],
            None => discard_backups(&run.history),
        };
        info!(files = run.files_modified.len(), "task completed");
        Ok(ExecutionResult {
            success: true,
            steps_completed,
            total_steps,
            files_modified: run.files_modified,
            error: None,
            rollback_performed: false,
            rollback_errors: Vec::new(),
            cleanup_errors,
            steps: run.reports,
        })
    }

    fn execute_step(
        &mut self,
        run: &mut TaskRun,
        cwd: &Path,
        index: usize,
        description: &str,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GateError::Cancelled.into());
        }

        let resolved = resolve_step(description);
        let mut report = StepReport {
            index,
            description: description.to_string(),
            target: None,
            operation: resolved.operation,
            status: StepStatus::Failed,
        };

        let Some(raw) = resolved.path.as_deref() else {
            if resolved.is_skippable() {
                warn!(step = index, %description, "no target file, skipping step");
                report.status = StepStatus::Skipped;
                run.reports.push(report);
                return Ok(());
            }
            run.reports.push(report);
            return Err(GateError::UnresolvableStepTarget {
                step: description.to_string(),
            }
            .into());
        };

        let rel = match confine(raw) {
            Ok(rel) => rel,
            Err(err) => {
                run.reports.push(report);
                return Err(err.into());
            }
        };
        report.target = Some(rel.clone());
        run.reports.push(report);

        info!(step = index, path = %rel.display(), op = resolved.operation.as_str(), "executing step");
        self.perform(run, cwd, &rel, resolved.operation, description)?;

        if let Some(report) = run.reports.last_mut() {
            report.status = StepStatus::Applied;
        }
        Ok(())
    }

    fn perform(
        &mut self,
        run: &mut TaskRun,
        cwd: &Path,
        rel: &Path,
        operation: Operation,
        description: &str,
    ) -> Result<()> {
        let abs = cwd.join(rel);
        if !run.touched(&abs) {
            snapshot(run, &abs)?;
        }

        match operation {
            Operation::Edit => self.write_generated(&abs, rel, description)?,
            Operation::Create => {
                if !abs.exists() {
                    write_creating_parents(&abs, "")?;
                }
                self.write_generated(&abs, rel, description)?;
            }
            Operation::Delete => match fs::remove_file(&abs) {
                Ok(()) => debug!(path = %rel.display(), "file deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %rel.display(), "file to delete does not exist");
                }
                Err(e) => return Err(e).with_context(|| format!("delete {}", abs.display())),
            },
        }
        run.note_modified(rel);

        let timeout = self.config.test_timeout;
        let result = self
            .tests
            .run_tests(cwd, timeout, &self.cancel)
            .context("run tests")?;
        if !result.success {
            return Err(failure_kind(&result, timeout).into());
        }
        Ok(())
    }

    fn write_generated(&mut self, abs: &Path, rel: &Path, description: &str) -> Result<()> {
        let current = read_optional(abs)?.unwrap_or_default();
        let content = self
            .generator
            .generate(rel, description, &current)
            .with_context(|| format!("generate content for {}", rel.display()))?;
        let file_diff = self
            .sandbox
            .stage_edit(EditRequest::new(abs, content, description))?;
        debug!(
            added = file_diff.line_changes.added,
            removed = file_diff.line_changes.removed,
            modified = file_diff.line_changes.modified,
            "staged generated content"
        );
        // History already holds the snapshot, so no per-step backup.
        self.sandbox.apply_edit(abs, false)
    }

    fn roll_back(&mut self, run: &TaskRun) -> Vec<String> {
        for entry in &run.history {
            self.sandbox.discard_edit(&entry.file);
        }
        compensate(&run.history)
    }
}

/// Record the first-touch state of `abs`.
///
/// Existing files also get a `.backup` sibling. A backup that is already
/// there is failure residue from an earlier run and is never overwritten.
fn snapshot(run: &mut TaskRun, abs: &Path) -> Result<()> {
    match read_optional(abs)? {
        Some(original) => {
            let backup = backup_path_for(abs);
            if backup.exists() {
                warn!(backup = %backup.display(), "stray backup found");
                return Err(GateError::StrayBackup { path: backup }.into());
            }
            run.record(ExecutionHistoryEntry {
                file: abs.to_path_buf(),
                backup_path: Some(backup.clone()),
                original_content: original.clone(),
                existed: true,
                created_dir: None,
            })?;
            fs::write(&backup, original)
                .with_context(|| format!("write backup {}", backup.display()))?;
        }
        None => run.record(ExecutionHistoryEntry {
            file: abs.to_path_buf(),
            backup_path: None,
            original_content: String::new(),
            existed: false,
            created_dir: highest_missing_dir(abs),
        })?,
    }
    debug!(path = %abs.display(), "snapshot recorded");
    Ok(())
}

/// Undo `history` in reverse order, continuing past individual failures.
///
/// Returns one message per file that could not be restored.
pub fn compensate(history: &[ExecutionHistoryEntry]) -> Vec<String> {
    let mut errors = Vec::new();
    for entry in history.iter().rev() {
        if let Err(err) = restore_entry(entry) {
            let failure = GateError::RollbackFailed {
                path: entry.file.clone(),
                reason: format!("{err:#}"),
            };
            error!(err = %failure, "rollback failed");
            errors.push(failure.to_string());
        }
    }
    errors
}

fn restore_entry(entry: &ExecutionHistoryEntry) -> Result<()> {
    if let Some(backup) = &entry.backup_path
        && backup.exists()
    {
        let content = fs::read_to_string(backup)
            .with_context(|| format!("read backup {}", backup.display()))?;
        write_creating_parents(&entry.file, &content)?;
        fs::remove_file(backup).with_context(|| format!("remove backup {}", backup.display()))?;
        debug!(path = %entry.file.display(), "restored from backup");
        return Ok(());
    }
    if !entry.existed {
        if entry.file.exists() {
            fs::remove_file(&entry.file)
                .with_context(|| format!("remove {}", entry.file.display()))?;
            debug!(path = %entry.file.display(), "removed file created by task");
        }
        if let Some(dir) = &entry.created_dir {
            remove_created_dirs(&entry.file, dir)?;
        }
        return Ok(());
    }
    write_creating_parents(&entry.file, &entry.original_content)?;
    debug!(path = %entry.file.display(), "restored from history");
    Ok(())
}

fn discard_backups(history: &[ExecutionHistoryEntry]) -> Vec<String> {
    let mut errors = Vec::new();
    for backup in history.iter().filter_map(|entry| entry.backup_path.as_ref()) {
        if let Err(e) = fs::remove_file(backup)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(backup = %backup.display(), err = %e, "failed to remove backup");
            errors.push(format!("remove backup {}: {e}", backup.display()));
        }
    }
    errors
}

/// Remove the task's journal. When that fails, fall back to an emptied
/// journal so a later `recover` is a no-op; report only if both fail.
fn finish_journal(run: &TaskRun) -> Option<String> {
    let (path, journal) = run.journal.as_ref()?;
    let err = remove_journal(path).err()?;
    let emptied = Journal {
        entries: Vec::new(),
        ..journal.clone()
    };
    match write_journal(path, &emptied) {
        Ok(()) => {
            warn!(err = %format!("{err:#}"), "failed to remove journal, emptied it instead");
            None
        }
        Err(write_err) => {
            error!(err = %format!("{err:#}"), "failed to remove journal");
            Some(format!(
                "journal {} must be deleted by hand, do not recover it: {err:#}; {write_err:#}",
                path.display()
            ))
        }
    }
}
