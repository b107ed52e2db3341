//! Test-only helpers: scripted collaborators and a throwaway project dir.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::TestResult;
use crate::io::collaborators::{ContentGenerator, Planner};
use crate::io::gate::TestRunner;
use crate::io::process::CancelToken;
use crate::io::sandbox::write_creating_parents;

/// Temporary project directory, removed on drop.
pub struct TestProject {
    temp: TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_creating_parents(&self.path().join(rel), contents)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        Ok(fs::read_to_string(self.path().join(rel))?)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path().join(rel).exists()
    }
}

/// Planner returning a fixed step list (or a fixed error).
pub struct ScriptedPlanner {
    steps: Result<Vec<String>, String>,
}

impl ScriptedPlanner {
    pub fn new(steps: &[&str]) -> Self {
        Self {
            steps: Ok(steps.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            steps: Err(message.to_string()),
        }
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, _goal: &str) -> Result<Vec<String>> {
        self.steps.clone().map_err(|msg| anyhow!(msg))
    }
}

#[derive(Debug, Clone)]
enum GeneratorScript {
    Echo,
    Fixed(String),
    Queue(RefCell<VecDeque<String>>),
}

/// Content generator driven by a script; records every request.
pub struct ScriptedGenerator {
    script: GeneratorScript,
    requests: RefCell<Vec<(PathBuf, String)>>,
}

impl ScriptedGenerator {
    /// Returns the current content unchanged.
    pub fn echo() -> Self {
        Self::with_script(GeneratorScript::Echo)
    }

    pub fn fixed(content: &str) -> Self {
        Self::with_script(GeneratorScript::Fixed(content.to_string()))
    }

    /// Returns each entry once, in order; errors when exhausted.
    pub fn sequence(contents: &[&str]) -> Self {
        let queue = contents.iter().map(|s| s.to_string()).collect();
        Self::with_script(GeneratorScript::Queue(RefCell::new(queue)))
    }

    fn with_script(script: GeneratorScript) -> Self {
        Self {
            script,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// `(file, instruction)` pairs seen so far.
    pub fn requests(&self) -> Vec<(PathBuf, String)> {
        self.requests.borrow().clone()
    }
}

impl ContentGenerator for ScriptedGenerator {
    fn generate(&self, file_path: &Path, instruction: &str, current_content: &str) -> Result<String> {
        self.requests
            .borrow_mut()
            .push((file_path.to_path_buf(), instruction.to_string()));
        match &self.script {
            GeneratorScript::Echo => Ok(current_content.to_string()),
            GeneratorScript::Fixed(content) => Ok(content.clone()),
            GeneratorScript::Queue(queue) => queue
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("scripted generator exhausted")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ScriptedRun {
    Pass,
    Fail,
    Timeout,
}

/// Test runner replaying a queue of outcomes; passes once the queue is empty.
pub struct ScriptedTestRunner {
    queue: RefCell<VecDeque<ScriptedRun>>,
    fallback: ScriptedRun,
    calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn always(success: bool) -> Self {
        let run = if success {
            ScriptedRun::Pass
        } else {
            ScriptedRun::Fail
        };
        Self::with_queue(VecDeque::new(), run)
    }

    pub fn sequence(outcomes: &[bool]) -> Self {
        let queue = outcomes
            .iter()
            .map(|&ok| if ok { ScriptedRun::Pass } else { ScriptedRun::Fail })
            .collect();
        Self::with_queue(queue, ScriptedRun::Pass)
    }

    pub fn timing_out() -> Self {
        Self::with_queue(VecDeque::new(), ScriptedRun::Timeout)
    }

    fn with_queue(queue: VecDeque<ScriptedRun>, fallback: ScriptedRun) -> Self {
        Self {
            queue: RefCell::new(queue),
            fallback,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run_tests(&self, _cwd: &Path, timeout: Duration, _cancel: &CancelToken) -> Result<TestResult> {
        self.calls.set(self.calls.get() + 1);
        let run = self.queue.borrow_mut().pop_front().unwrap_or(self.fallback);
        Ok(match run {
            ScriptedRun::Pass => TestResult {
                success: true,
                output: "all tests passed".to_string(),
                error: None,
                exit_code: Some(0),
                timed_out: false,
                cancelled: false,
                duration_ms: 1,
            },
            ScriptedRun::Fail => TestResult {
                success: false,
                output: "FAIL scripted".to_string(),
                error: Some("FAIL scripted".to_string()),
                exit_code: Some(1),
                timed_out: false,
                cancelled: false,
                duration_ms: 1,
            },
            ScriptedRun::Timeout => TestResult {
                success: false,
                output: String::new(),
                error: Some(format!("test run timed out after {}s", timeout.as_secs())),
                exit_code: None,
                timed_out: true,
                cancelled: false,
                duration_ms: timeout.as_millis() as u64,
            },
        })
    }
}
