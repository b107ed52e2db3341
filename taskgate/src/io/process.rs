//! Child processes with timeouts, bounded output and cancellation.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Granularity at which a running child checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output readers may keep draining once the process group is dead.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Cooperative cancellation signal shared between a caller and a running task.
///
/// Cancelling kills any child process currently waited on through
/// [`ProcessRunner::run`] and stops a task before its next step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A command to run in a working directory.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(60),
            output_limit_bytes: 1_000_000,
        }
    }

    /// Run `line` through the platform shell.
    pub fn shell(line: &str, workdir: impl Into<PathBuf>) -> Self {
        let (program, flag) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        Self::new(program, workdir).args([flag, line])
    }

    /// Build a request from an argv array (`command[0]` is the program).
    pub fn from_argv(command: &[String], workdir: impl Into<PathBuf>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
        Ok(Self::new(program.clone(), workdir).args(args.iter().cloned()))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_limit_bytes(mut self, limit: usize) -> Self {
        self.output_limit_bytes = limit;
        self
    }

    /// Human-readable command line for logs and errors.
    pub fn display(&self) -> String {
        let mut buf = self.program.clone();
        for arg in &self.args {
            buf.push(' ');
            buf.push_str(arg);
        }
        buf
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }

    /// Stdout followed by stderr, lossily decoded, with truncation notices.
    pub fn combined(&self, label: &str) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        buf.push_str(&self.stdout_truncated_notice(label));
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        buf.push_str(&self.stderr_truncated_notice(label));
        buf
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Abstraction over process execution so orchestration can be tested
/// without spawning anything.
pub trait ProcessRunner {
    fn run(&self, request: &ProcessRequest, cancel: &CancelToken) -> Result<CommandOutput>;
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, request: &ProcessRequest, cancel: &CancelToken) -> Result<CommandOutput> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args).current_dir(&request.workdir);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        run_command_with_timeout(
            cmd,
            request.stdin.as_deref(),
            request.timeout,
            request.output_limit_bytes,
            cancel,
        )
        .with_context(|| format!("run `{}`", request.display()))
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child is killed when the timeout elapses or `cancel` fires.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe; that is not our error.
        if let Err(e) = child_stdin.write_all(input) {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e).context("write stdin");
            }
            debug!("child closed stdin early");
        }
    }

    let deadline = started + timeout;
    let pid = child.id();
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if cancel.is_cancelled() {
            warn!("command cancelled, killing process group");
            cancelled = true;
            break kill_and_wait(&mut child)?;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            break kill_and_wait(&mut child)?;
        }
        let slice = CANCEL_POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    // Background grandchildren can keep the pipes open after the direct child exits.
    let drain_until = deadline.max(Instant::now() + CANCEL_POLL_INTERVAL);
    if !timed_out
        && !cancelled
        && !wait_finished(&stdout_handle, &stderr_handle, drain_until, cancel)
    {
        if cancel.is_cancelled() {
            cancelled = true;
        } else {
            timed_out = true;
        }
        warn!("process group still holds output pipes, killing it");
        signal_group(pid);
    }

    let grace = Instant::now() + READER_GRACE;
    let (stdout, stdout_truncated) = join_output(stdout_handle, grace).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, grace).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
        duration: started.elapsed(),
    })
}

/// Put the child in a fresh process group so a kill reaches everything it spawned.
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// SIGKILL the process group led by `pid`. A group that is already gone is fine.
#[cfg(unix)]
fn signal_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(err = %e, pid, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

fn kill_and_wait(child: &mut Child) -> Result<ExitStatus> {
    signal_group(child.id());
    if let Err(e) = child.kill()
        && e.kind() != std::io::ErrorKind::InvalidInput
    {
        return Err(e).context("kill command");
    }
    child.wait().context("wait command after kill")
}

type OutputHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Wait until both readers hit EOF, `until` passes, or `cancel` fires.
fn wait_finished(
    stdout: &OutputHandle,
    stderr: &OutputHandle,
    until: Instant,
    cancel: &CancelToken,
) -> bool {
    loop {
        if stdout.is_finished() && stderr.is_finished() {
            return true;
        }
        if cancel.is_cancelled() || Instant::now() >= until {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Join a reader, giving up at `until`; an abandoned reader yields no output.
fn join_output(handle: OutputHandle, until: Instant) -> Result<(Vec<u8>, usize)> {
    while !handle.is_finished() {
        if Instant::now() >= until {
            warn!("output reader still blocked after kill, abandoning it");
            return Ok((Vec::new(), 0));
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn run(request: &ProcessRequest) -> CommandOutput {
        SystemProcessRunner
            .run(request, &CancelToken::new())
            .expect("run")
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run(&ProcessRequest::shell("echo out; echo err 1>&2", temp.path()));
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy(), "out\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "err\n");
        assert_eq!(out.combined("test"), "out\nerr\n");
    }

    #[test]
    fn passes_stdin_and_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = ProcessRequest::shell("printf '%s:' \"$GREETING\"; cat", temp.path())
            .env("GREETING", "hi")
            .stdin("body");
        let out = run(&request);
        assert_eq!(out.stdout_lossy(), "hi:body");
    }

    #[test]
    fn kills_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request =
            ProcessRequest::shell("sleep 5", temp.path()).timeout(Duration::from_millis(200));
        let out = run(&request);
        assert!(out.timed_out);
        assert!(!out.cancelled);
        assert!(out.duration < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_grandchildren_of_compound_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = ProcessRequest::shell("sleep 5; echo done", temp.path())
            .timeout(Duration::from_millis(300));
        let started = Instant::now();
        let out = run(&request);
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert!(!out.stdout_lossy().contains("done"));
    }

    #[test]
    fn background_child_holding_pipes_is_killed_at_deadline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = ProcessRequest::shell("sleep 5 & echo started", temp.path())
            .timeout(Duration::from_millis(300));
        let started = Instant::now();
        let out = run(&request);
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert_eq!(out.stdout_lossy(), "started\n");
    }

    #[test]
    fn cancel_mid_run_kills_compound_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();
        let out = SystemProcessRunner
            .run(
                &ProcessRequest::shell("sleep 5; true", temp.path())
                    .timeout(Duration::from_secs(30)),
                &cancel,
            )
            .expect("run");
        canceller.join().expect("canceller");
        assert!(out.cancelled);
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn pre_cancelled_token_kills_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = SystemProcessRunner
            .run(&ProcessRequest::shell("sleep 5", temp.path()), &cancel)
            .expect("run");
        assert!(out.cancelled);
        assert!(!out.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = ProcessRequest::shell("printf 0123456789", temp.path()).output_limit_bytes(4);
        let out = run(&request);
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.combined("test").contains("stdout truncated 6 bytes"));
    }

    #[test]
    fn from_argv_rejects_empty_command() {
        assert!(ProcessRequest::from_argv(&[], ".").is_err());
    }
}
