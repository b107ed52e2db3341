//! CLI tests for `taskgate run`, `resolve`, and `recover`.
//!
//! Spawns the taskgate binary against a temporary project and verifies exit
//! codes and on-disk effects.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use taskgate::exit_codes;
use taskgate::io::config::{TaskgateConfig, config_path, write_config};

fn configure(root: &Path, test_command: &str) {
    let mut cfg = TaskgateConfig::default();
    cfg.gate.command = Some(test_command.to_string());
    cfg.gate.timeout_secs = 10;
    cfg.generator.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "printf 'generated for %s\\n' \"$TASKGATE_FILE\"".to_string(),
    ];
    write_config(&config_path(root), &cfg).expect("write config");
}

fn taskgate(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskgate"))
        .arg("-C")
        .arg(root)
        .args(args)
        .env_remove("TASKGATE_TEST_COMMAND")
        .output()
        .expect("spawn taskgate")
}

#[test]
fn run_with_passing_tests_applies_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    configure(root, "echo all good");
    fs::write(root.join("index.js"), "old\n").expect("write");
    fs::write(
        root.join("plan.txt"),
        "1. Edit index.js to add a handler\n2. Run the test suite\n",
    )
    .expect("write plan");

    let out = taskgate(root, &["run", "--goal", "add handler", "--plan", "plan.txt"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    assert_eq!(
        fs::read_to_string(root.join("index.js")).expect("read"),
        "generated for index.js\n"
    );
    assert!(!root.join("index.js.backup").exists());
}

#[test]
fn run_with_failing_tests_rolls_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    configure(root, "echo 'FAIL src/app.test.js'");
    fs::write(root.join("app.ts"), "original\n").expect("write");
    fs::write(root.join("plan.txt"), "Edit app.ts to break it\n").expect("write plan");

    let out = taskgate(
        root,
        &["run", "--goal", "break", "--plan", "plan.txt", "--json"],
    );

    assert_eq!(out.status.code(), Some(exit_codes::ROLLED_BACK), "{out:?}");
    let result: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json result");
    assert_eq!(result["success"], false);
    assert_eq!(result["rollback_performed"], true);
    assert_eq!(
        fs::read_to_string(root.join("app.ts")).expect("read"),
        "original\n"
    );
}

#[test]
fn resolve_prints_target_and_operation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskgate(temp.path(), &["resolve", "Create src/utils/logger.ts"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let resolved: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(resolved["path"], "src/utils/logger.ts");
    assert_eq!(resolved["operation"], "create");
}

#[test]
fn recover_without_journal_is_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskgate(temp.path(), &["recover"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn invalid_config_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = config_path(temp.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, "[gate]\ntimeout_secs = 0\n").expect("write");

    let out = taskgate(temp.path(), &["test"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}
