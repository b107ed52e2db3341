//! Test-suite validation gate.
//!
//! The [`TestRunner`] trait decouples orchestration from how tests are run.
//! [`ValidationGate`] runs the project's configured shell command through a
//! [`ProcessRunner`] and classifies the captured output with
//! [`crate::core::verdict`]. Tests use scripted runners that never spawn.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::error::GateError;
use crate::core::types::TestResult;
use crate::core::verdict::{RunFacts, VerdictMode, passed, tail};
use crate::io::config::{GateConfig, TEST_COMMAND_ENV, resolve_test_command};
use crate::io::process::{CancelToken, ProcessRequest, ProcessRunner, SystemProcessRunner};
use crate::io::sandbox::{Sandbox, highest_missing_dir, remove_created_dirs};

/// Default bound on one test run.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Lines of output kept in failure summaries.
const FAILURE_TAIL_LINES: usize = 20;

/// Abstraction over running the project's test suite.
pub trait TestRunner {
    /// Run the tests in `cwd`. Timeouts and cancellation yield a failing
    /// [`TestResult`]; `Err` is reserved for being unable to run at all.
    fn run_tests(&self, cwd: &Path, timeout: Duration, cancel: &CancelToken)
    -> Result<TestResult>;
}

/// Runs a shell test command and classifies its output.
#[derive(Debug, Clone)]
pub struct ValidationGate<P = SystemProcessRunner> {
    command: String,
    mode: VerdictMode,
    output_limit_bytes: usize,
    process: P,
}

impl ValidationGate<SystemProcessRunner> {
    /// Build a gate for the project at `root`.
    ///
    /// The command is resolved once, here: `TASKGATE_TEST_COMMAND`, then
    /// `gate.command`, then project-marker detection.
    pub fn from_config(cfg: &GateConfig, root: &Path) -> Self {
        let env_override = std::env::var(TEST_COMMAND_ENV).ok();
        let command = resolve_test_command(cfg, env_override.as_deref(), root);
        debug!(%command, "resolved test command");
        Self::with_runner(command, cfg.mode, cfg.output_limit_bytes, SystemProcessRunner)
    }
}

impl<P: ProcessRunner> ValidationGate<P> {
    pub fn with_runner(
        command: impl Into<String>,
        mode: VerdictMode,
        output_limit_bytes: usize,
        process: P,
    ) -> Self {
        Self {
            command: command.into(),
            mode,
            output_limit_bytes,
            process,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn mode(&self) -> VerdictMode {
        self.mode
    }
}

impl<P: ProcessRunner> TestRunner for ValidationGate<P> {
    #[instrument(skip_all, fields(command = %self.command, timeout_secs = timeout.as_secs()))]
    fn run_tests(
        &self,
        cwd: &Path,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<TestResult> {
        let request = ProcessRequest::shell(&self.command, cwd)
            .env("CI", "true")
            .env("NO_COLOR", "1")
            .env("FORCE_COLOR", "0")
            .timeout(timeout)
            .output_limit_bytes(self.output_limit_bytes);
        let out = self.process.run(&request, cancel).context("run test command")?;

        let output = out.combined("test");
        let killed = out.timed_out || out.cancelled;
        let exit_code = if killed { None } else { out.status.code() };
        let success = passed(
            self.mode,
            &RunFacts {
                output: &output,
                exit_code,
                timed_out: out.timed_out,
                cancelled: out.cancelled,
            },
        );
        let error = if out.timed_out {
            Some(format!("test run timed out after {}s", timeout.as_secs()))
        } else if out.cancelled {
            Some("test run cancelled".to_string())
        } else if !success {
            Some(tail(&output, FAILURE_TAIL_LINES))
        } else {
            None
        };

        info!(success, exit_code = ?exit_code, timed_out = out.timed_out, "test run finished");
        Ok(TestResult {
            success,
            output,
            error,
            exit_code,
            timed_out: out.timed_out,
            cancelled: out.cancelled,
            duration_ms: out.duration.as_millis() as u64,
        })
    }
}

/// Map a failing [`TestResult`] to its error kind.
pub fn failure_kind(result: &TestResult, timeout: Duration) -> GateError {
    if result.timed_out {
        GateError::TestTimeout {
            timeout_secs: timeout.as_secs(),
        }
    } else if result.cancelled {
        GateError::Cancelled
    } else {
        GateError::TestFailure {
            summary: result
                .error
                .clone()
                .unwrap_or_else(|| "failure indicators in test output".to_string()),
        }
    }
}

/// Outcome of [`apply_edit_with_test`].
#[derive(Debug, Clone, Serialize)]
pub struct GatedApply {
    pub test_result: TestResult,
    /// False when the edit was rolled back after failing tests.
    pub applied: bool,
}

/// Apply the staged edit for `path` (with backup), run the tests, and undo the
/// edit when they fail and `auto_rollback` is set.
///
/// A failed undo is returned as [`GateError::RollbackFailed`]: leaving a
/// known-bad file in place silently is worse than surfacing the error.
#[instrument(skip_all, fields(path = %path.display(), auto_rollback))]
pub fn apply_edit_with_test<T: TestRunner>(
    runner: &T,
    sandbox: &mut Sandbox,
    path: &Path,
    timeout: Duration,
    auto_rollback: bool,
    cancel: &CancelToken,
) -> Result<GatedApply> {
    let abs = sandbox.resolve(path);
    let existed = abs.exists();
    let created_dir = if existed {
        None
    } else {
        highest_missing_dir(&abs)
    };
    sandbox.apply_edit(path, true)?;

    let cwd = sandbox.root().to_path_buf();
    let test_result = match runner.run_tests(&cwd, timeout, cancel) {
        Ok(result) => result,
        Err(err) => {
            if auto_rollback {
                undo_apply(sandbox, path, existed, created_dir.as_deref())?;
            }
            return Err(err);
        }
    };

    if !test_result.success && auto_rollback {
        warn!("tests failed, rolling back edit");
        undo_apply(sandbox, path, existed, created_dir.as_deref())?;
        return Ok(GatedApply {
            test_result,
            applied: false,
        });
    }

    Ok(GatedApply {
        test_result,
        applied: true,
    })
}

fn undo_apply(
    sandbox: &mut Sandbox,
    path: &Path,
    existed: bool,
    created_dir: Option<&Path>,
) -> Result<()> {
    let outcome = if existed {
        sandbox.rollback(path)
    } else {
        let abs: PathBuf = sandbox.resolve(path);
        fs::remove_file(&abs)
            .with_context(|| format!("remove {}", abs.display()))
            .and_then(|()| match created_dir {
                Some(dir) => remove_created_dirs(&abs, dir),
                None => Ok(()),
            })
    };
    outcome.map_err(|err| {
        error!(err = %format!("{err:#}"), "rollback failed");
        anyhow::Error::from(GateError::RollbackFailed {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        })
    })
}
