//! Task-level lifecycle tests.
//!
//! These drive `TaskExecutor::execute_task` end to end against a temporary
//! project: multi-step success, all-or-nothing rollback, snapshot-once history,
//! skipped steps, and crash recovery through the journal.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use taskgate::core::types::{ExecutionResult, StepStatus, TestResult};
use taskgate::io::gate::TestRunner;
use taskgate::io::journal::{journal_path, load_journal_if_present};
use taskgate::io::process::CancelToken;
use taskgate::io::sandbox::Sandbox;
use taskgate::recover::recover;
use taskgate::task::{TaskConfig, TaskExecutor, TaskRequest};
use taskgate::test_support::{
    ScriptedGenerator, ScriptedPlanner, ScriptedTestRunner, TestProject,
};

fn journaled(project: &TestProject) -> TaskConfig {
    TaskConfig {
        journal_path: Some(journal_path(project.path())),
        ..TaskConfig::default()
    }
}

fn execute<T: TestRunner>(
    project: &TestProject,
    steps: &[&str],
    generator: &ScriptedGenerator,
    tests: &T,
) -> ExecutionResult {
    let planner = ScriptedPlanner::new(steps);
    let mut sandbox = Sandbox::new(project.path());
    TaskExecutor::new(&planner, generator, tests, &mut sandbox, journaled(project))
        .execute_task(&TaskRequest::new("add login", project.path()))
        .expect("execute task")
}

/// Records, per test run, which files the journal holds snapshots for.
struct JournalWatcher {
    root: PathBuf,
    outcomes: RefCell<Vec<bool>>,
    seen: RefCell<Vec<Vec<(PathBuf, String)>>>,
}

impl JournalWatcher {
    fn new(root: &Path, outcomes: &[bool]) -> Self {
        Self {
            root: root.to_path_buf(),
            outcomes: RefCell::new(outcomes.iter().rev().copied().collect()),
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl TestRunner for JournalWatcher {
    fn run_tests(&self, _cwd: &Path, _timeout: Duration, _cancel: &CancelToken) -> Result<TestResult> {
        let journal = load_journal_if_present(&journal_path(&self.root))?
            .expect("journal exists while task runs");
        self.seen.borrow_mut().push(
            journal
                .entries
                .into_iter()
                .map(|entry| (entry.file, entry.original_content))
                .collect(),
        );
        let success = self.outcomes.borrow_mut().pop().unwrap_or(true);
        Ok(TestResult {
            success,
            output: if success { "ok" } else { "FAIL" }.to_string(),
            error: (!success).then(|| "FAIL".to_string()),
            exit_code: Some(if success { 0 } else { 1 }),
            timed_out: false,
            cancelled: false,
            duration_ms: 0,
        })
    }
}

#[test]
fn three_step_task_completes_and_leaves_no_residue() {
    let project = TestProject::new().expect("project");
    project
        .write("src/routes/auth.js", "module.exports = {};\n")
        .expect("write");
    project.write("src/legacy.js", "old\n").expect("write");

    let generator = ScriptedGenerator::sequence(&["login route\n", "export const log = 1;\n"]);
    let tests = ScriptedTestRunner::always(true);
    let result = execute(
        &project,
        &[
            "Edit src/routes/auth.js to add /login",
            "Create src/utils/logger.ts",
            "Remove src/legacy.js",
        ],
        &generator,
        &tests,
    );

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.steps_completed, 3);
    assert_eq!(result.total_steps, 3);
    assert_eq!(
        result.files_modified,
        vec![
            PathBuf::from("src/routes/auth.js"),
            PathBuf::from("src/utils/logger.ts"),
            PathBuf::from("src/legacy.js"),
        ]
    );
    assert_eq!(
        project.read("src/routes/auth.js").expect("read"),
        "login route\n"
    );
    assert_eq!(
        project.read("src/utils/logger.ts").expect("read"),
        "export const log = 1;\n"
    );
    assert!(!project.exists("src/legacy.js"));
    assert!(!project.exists("src/routes/auth.js.backup"));
    assert!(!project.exists("src/legacy.js.backup"));
    assert!(!journal_path(project.path()).exists());
    assert_eq!(tests.calls(), 3);
    assert_eq!(
        generator.requests()[0],
        (
            PathBuf::from("src/routes/auth.js"),
            "Edit src/routes/auth.js to add /login".to_string()
        )
    );
}

#[test]
fn failure_in_step_two_restores_everything_touched() {
    let project = TestProject::new().expect("project");
    project.write("src/a.js", "a original\n").expect("write");

    let tests = ScriptedTestRunner::sequence(&[true, false]);
    let result = execute(
        &project,
        &[
            "Edit src/a.js to export a helper",
            "Create src/lib/b.js with the new module",
            "Edit src/c.js to call the helper",
        ],
        &ScriptedGenerator::fixed("changed\n"),
        &tests,
    );

    assert!(!result.success);
    assert!(result.steps_completed < result.total_steps);
    assert_eq!(result.steps_completed, 1);
    assert!(result.rollback_performed);
    assert!(result.rollback_errors.is_empty());
    assert_eq!(project.read("src/a.js").expect("read"), "a original\n");
    assert!(!project.exists("src/lib/b.js"));
    assert!(!project.exists("src/lib"));
    assert!(!project.exists("src/c.js"));
    assert!(!project.exists("src/a.js.backup"));
    assert!(!journal_path(project.path()).exists());
    let error = result.error.expect("error message");
    assert!(error.starts_with("step 2"), "{error}");
    assert!(error.contains("tests failed"), "{error}");
    assert_eq!(
        result
            .steps
            .iter()
            .map(|step| step.status)
            .collect::<Vec<_>>(),
        vec![StepStatus::Applied, StepStatus::Failed]
    );
}

#[test]
fn repeated_edits_keep_one_snapshot_from_before_the_task() {
    let project = TestProject::new().expect("project");
    project.write("lib/util.py", "v0\n").expect("write");

    let watcher = JournalWatcher::new(project.path(), &[true, false]);
    let result = execute(
        &project,
        &["Edit lib/util.py to add parse", "Update lib/util.py: add format"],
        &ScriptedGenerator::sequence(&["v1\n", "v2\n"]),
        &watcher,
    );

    let seen = watcher.seen.borrow();
    assert_eq!(seen.len(), 2);
    for snapshot in seen.iter() {
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, project.path().join("lib/util.py"));
        assert_eq!(snapshot[0].1, "v0\n");
    }
    assert!(!result.success);
    assert_eq!(project.read("lib/util.py").expect("read"), "v0\n");
}

#[test]
fn unresolvable_step_is_skipped_and_task_continues() {
    let project = TestProject::new().expect("project");
    let tests = ScriptedTestRunner::always(true);
    let result = execute(
        &project,
        &["Run the test suite", "Create src/utils/logger.ts"],
        &ScriptedGenerator::fixed("export {};\n"),
        &tests,
    );

    assert!(result.success);
    assert_eq!(result.steps_completed, 2);
    assert_eq!(result.steps[0].status, StepStatus::Skipped);
    assert_eq!(result.steps[0].target, None);
    assert_eq!(result.files_modified, vec![PathBuf::from("src/utils/logger.ts")]);
    assert_eq!(tests.calls(), 1);
}

#[test]
fn interrupted_task_is_recovered_from_journal() {
    let project = TestProject::new().expect("project");
    project.write("app.rb", "puts 1\n").expect("write");

    // In-process rollback removes the journal, so capture it mid-task to
    // simulate a process that died during the test run.
    struct Crash {
        root: PathBuf,
    }
    impl TestRunner for Crash {
        fn run_tests(&self, _cwd: &Path, _timeout: Duration, _cancel: &CancelToken) -> Result<TestResult> {
            let path = journal_path(&self.root);
            std::fs::copy(&path, self.root.join("journal.saved"))?;
            anyhow::bail!("test harness crashed")
        }
    }

    let result = execute(
        &project,
        &["Edit app.rb to print 2"],
        &ScriptedGenerator::fixed("puts 2\n"),
        &Crash {
            root: project.path().to_path_buf(),
        },
    );
    assert!(!result.success);
    assert!(result.rollback_performed);

    // Replay the captured state: file mutated, backup present, journal pending.
    project.write("app.rb", "puts 2\n").expect("write");
    project.write("app.rb.backup", "puts 1\n").expect("write");
    std::fs::rename(
        project.path().join("journal.saved"),
        journal_path(project.path()),
    )
    .expect("restore journal");

    // A new task refuses to start while the journal is pending.
    let planner = ScriptedPlanner::new(&["Edit app.rb"]);
    let generator = ScriptedGenerator::echo();
    let tests = ScriptedTestRunner::always(true);
    let mut sandbox = Sandbox::new(project.path());
    assert!(
        TaskExecutor::new(&planner, &generator, &tests, &mut sandbox, journaled(&project))
            .execute_task(&TaskRequest::new("again", project.path()))
            .is_err()
    );

    let outcome = recover(project.path())
        .expect("recover")
        .expect("pending journal");
    assert!(outcome.complete());
    assert_eq!(outcome.goal, "add login");
    assert_eq!(project.read("app.rb").expect("read"), "puts 1\n");
    assert!(!project.exists("app.rb.backup"));
    assert!(recover(project.path()).expect("recover").is_none());
}
