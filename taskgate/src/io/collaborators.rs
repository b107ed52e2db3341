//! External collaborators: the planner and the content generator.
//!
//! The core never decides what to change or writes replacement code itself.
//! [`Planner`] and [`ContentGenerator`] are the seams; the command-backed
//! implementations here spawn user-configured programs, and tests use
//! scripted implementations that return predetermined outputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{
    CancelToken, CommandOutput, ProcessRequest, ProcessRunner, SystemProcessRunner,
};

/// Environment variable carrying the target file for generator commands.
pub const GENERATOR_FILE_ENV: &str = "TASKGATE_FILE";
/// Environment variable carrying the step instruction for generator commands.
pub const GENERATOR_INSTRUCTION_ENV: &str = "TASKGATE_INSTRUCTION";

/// Turns a goal into an ordered list of human-readable steps.
pub trait Planner {
    fn plan(&self, goal: &str) -> Result<Vec<String>>;
}

/// Produces the full replacement content for one file.
pub trait ContentGenerator {
    fn generate(&self, file_path: &Path, instruction: &str, current_content: &str)
    -> Result<String>;
}

/// Split planner text into steps: one per non-empty line, list markers removed.
pub fn parse_steps(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim_start();
        }
    }
    line
}

/// Planner that reads steps from a text file, ignoring the goal.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    path: PathBuf,
}

impl FilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Planner for FilePlanner {
    fn plan(&self, _goal: &str) -> Result<Vec<String>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read plan {}", self.path.display()))?;
        Ok(parse_steps(&text))
    }
}

/// Planner that pipes the goal to a command and reads steps from its stdout.
#[derive(Debug, Clone)]
pub struct CommandPlanner<P = SystemProcessRunner> {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
    process: P,
}

impl CommandPlanner<SystemProcessRunner> {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::with_runner(command, workdir, timeout, SystemProcessRunner)
    }
}

impl<P: ProcessRunner> CommandPlanner<P> {
    pub fn with_runner(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        process: P,
    ) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
            cancel: CancelToken::new(),
            process,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<P: ProcessRunner> Planner for CommandPlanner<P> {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn plan(&self, goal: &str) -> Result<Vec<String>> {
        info!(workdir = %self.workdir.display(), "running planner");
        let request = ProcessRequest::from_argv(&self.command, &self.workdir)
            .context("planner.command")?
            .stdin(goal)
            .timeout(self.timeout);
        let out = self.process.run(&request, &self.cancel)?;
        ensure_finished("planner", &out, self.timeout)?;
        let steps = parse_steps(&out.stdout_lossy());
        debug!(steps = steps.len(), "planner produced steps");
        Ok(steps)
    }
}

/// Generator that runs a command per file.
///
/// The command receives the current content on stdin and the target path and
/// instruction in `TASKGATE_FILE` / `TASKGATE_INSTRUCTION`; its stdout becomes
/// the new content.
#[derive(Debug, Clone)]
pub struct CommandGenerator<P = SystemProcessRunner> {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: CancelToken,
    process: P,
}

impl CommandGenerator<SystemProcessRunner> {
    pub fn new(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self::with_runner(
            command,
            workdir,
            timeout,
            output_limit_bytes,
            SystemProcessRunner,
        )
    }
}

impl<P: ProcessRunner> CommandGenerator<P> {
    pub fn with_runner(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
        process: P,
    ) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
            cancel: CancelToken::new(),
            process,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<P: ProcessRunner> ContentGenerator for CommandGenerator<P> {
    #[instrument(skip_all, fields(file = %file_path.display()))]
    fn generate(
        &self,
        file_path: &Path,
        instruction: &str,
        current_content: &str,
    ) -> Result<String> {
        let request = ProcessRequest::from_argv(&self.command, &self.workdir)
            .context("generator.command")?
            .env(GENERATOR_FILE_ENV, file_path.to_string_lossy())
            .env(GENERATOR_INSTRUCTION_ENV, instruction)
            .stdin(current_content)
            .timeout(self.timeout)
            .output_limit_bytes(self.output_limit_bytes);
        let out = self.process.run(&request, &self.cancel)?;
        ensure_finished("generator", &out, self.timeout)?;
        if out.stdout_truncated > 0 {
            return Err(anyhow!(
                "generator output exceeded {} bytes (truncated {})",
                self.output_limit_bytes,
                out.stdout_truncated
            ));
        }
        String::from_utf8(out.stdout).context("generator output is not valid UTF-8")
    }
}

fn ensure_finished(label: &str, out: &CommandOutput, timeout: Duration) -> Result<()> {
    if out.cancelled {
        return Err(anyhow!("{label} cancelled"));
    }
    if out.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "{label} timed out");
        return Err(anyhow!("{label} timed out after {:?}", timeout));
    }
    if !out.status.success() {
        warn!(exit_code = ?out.status.code(), "{label} failed");
        return Err(anyhow!(
            "{label} failed with status {:?}: {}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}
