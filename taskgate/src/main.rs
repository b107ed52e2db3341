//! Test-gated task executor.
//!
//! Plans a goal into steps, applies each step to one file, runs the project's
//! tests after every step, and rolls back every touched file on failure.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use taskgate::core::diff::diff;
use taskgate::core::resolve::resolve_step;
use taskgate::core::types::{ExecutionResult, StepStatus};
use taskgate::exit_codes;
use taskgate::io::collaborators::{CommandGenerator, CommandPlanner, FilePlanner, Planner};
use taskgate::io::config::{TaskgateConfig, config_path, load_config, write_config};
use taskgate::io::gate::{TestRunner, ValidationGate};
use taskgate::io::process::CancelToken;
use taskgate::io::sandbox::Sandbox;
use taskgate::logging;
use taskgate::recover::recover;
use taskgate::task::{TaskConfig, TaskExecutor, TaskRequest};

#[derive(Parser)]
#[command(
    name = "taskgate",
    version,
    about = "Apply planned file edits step by step, gated by the project's tests"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,
    /// Debug-level logging unless `RUST_LOG` is set.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.taskgate/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan and execute a goal, rolling back on any failure.
    Run {
        #[arg(short, long)]
        goal: String,
        /// Read steps from this file instead of running `planner.command`.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Print the execution result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show how a step description resolves to a file and operation.
    Resolve { step: String },
    /// Print the line diff between two files.
    Diff {
        old: PathBuf,
        new: PathBuf,
        /// Path label used in the diff header.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Run the configured test command once.
    Test,
    /// Restore files from the journal of an interrupted task.
    Recover,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run { goal, plan, json } => cmd_run(&root, goal, plan, json),
        Command::Resolve { step } => cmd_resolve(&step),
        Command::Diff { old, new, path } => cmd_diff(&old, &new, path),
        Command::Test => cmd_test(&root),
        Command::Recover => cmd_recover(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = config_path(root);
    if path.exists() && !force {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &TaskgateConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Where the step list comes from.
enum PlanSource {
    File(FilePlanner),
    Command(CommandPlanner),
}

impl Planner for PlanSource {
    fn plan(&self, goal: &str) -> Result<Vec<String>> {
        match self {
            Self::File(planner) => planner.plan(goal),
            Self::Command(planner) => planner.plan(goal),
        }
    }
}

fn cmd_run(root: &Path, goal: String, plan: Option<PathBuf>, json: bool) -> Result<i32> {
    let cfg = load_config(&config_path(root))?;
    let cancel = CancelToken::new();

    let planner = match plan {
        Some(path) => PlanSource::File(FilePlanner::new(path)),
        None if !cfg.planner.command.is_empty() => PlanSource::Command(
            CommandPlanner::new(
                cfg.planner.command.clone(),
                root,
                std::time::Duration::from_secs(cfg.planner.timeout_secs),
            )
            .with_cancel(cancel.clone()),
        ),
        None => bail!("no plan source: pass --plan or set planner.command in config"),
    };
    if cfg.generator.command.is_empty() {
        bail!("generator.command is not configured");
    }
    let generator = CommandGenerator::new(
        cfg.generator.command.clone(),
        root,
        std::time::Duration::from_secs(cfg.generator.timeout_secs),
        cfg.generator.output_limit_bytes,
    )
    .with_cancel(cancel.clone());
    let gate = ValidationGate::from_config(&cfg.gate, root);

    let mut sandbox = Sandbox::new(root);
    let result = TaskExecutor::new(
        &planner,
        &generator,
        &gate,
        &mut sandbox,
        TaskConfig::from_config(&cfg, root),
    )
    .with_cancel(cancel)
    .execute_task(&TaskRequest::new(goal, root))?;

    if json {
        print_json(&result)?;
    } else {
        print_summary(&result);
    }
    Ok(if result.success {
        exit_codes::OK
    } else if result.rollback_incomplete() {
        exit_codes::ROLLBACK_INCOMPLETE
    } else {
        exit_codes::ROLLED_BACK
    })
}

fn print_summary(result: &ExecutionResult) {
    for step in &result.steps {
        let marker = match step.status {
            StepStatus::Applied => "ok",
            StepStatus::Skipped => "skip",
            StepStatus::Failed => "FAILED",
        };
        let target = step
            .target
            .as_ref()
            .map(|p| format!(" [{} {}]", step.operation.as_str(), p.display()))
            .unwrap_or_default();
        println!("{:>3}. {marker:<6} {}{target}", step.index, step.description);
    }
    println!(
        "{}/{} steps completed",
        result.steps_completed, result.total_steps
    );
    if let Some(error) = &result.error {
        println!("error: {error}");
    }
    if !result.success {
        if result.rollback_performed {
            println!("all changes rolled back");
        } else {
            println!("rollback incomplete:");
            for err in &result.rollback_errors {
                println!("  - {err}");
            }
        }
    }
    if !result.cleanup_errors.is_empty() {
        println!("cleanup failed:");
        for err in &result.cleanup_errors {
            println!("  - {err}");
        }
    }
}

fn cmd_resolve(step: &str) -> Result<i32> {
    let resolved = resolve_step(step);
    print_json(&resolved)?;
    Ok(exit_codes::OK)
}

fn cmd_diff(old: &Path, new: &Path, label: Option<PathBuf>) -> Result<i32> {
    let old_content =
        fs::read_to_string(old).with_context(|| format!("read {}", old.display()))?;
    let new_content =
        fs::read_to_string(new).with_context(|| format!("read {}", new.display()))?;
    let file_diff = diff(&old_content, &new_content, label.unwrap_or_else(|| new.to_path_buf()));
    println!("--- {}", file_diff.file_path.display());
    print!("{}", file_diff.unified_diff_text);
    let changes = &file_diff.line_changes;
    eprintln!(
        "{} added, {} removed, {} modified",
        changes.added, changes.removed, changes.modified
    );
    Ok(exit_codes::OK)
}

fn cmd_test(root: &Path) -> Result<i32> {
    let cfg = load_config(&config_path(root))?;
    let gate = ValidationGate::from_config(&cfg.gate, root);
    let result = gate.run_tests(root, cfg.gate.timeout(), &CancelToken::new())?;
    print!("{}", result.output);
    if result.success {
        println!("tests passed ({} ms)", result.duration_ms);
        Ok(exit_codes::OK)
    } else {
        println!(
            "tests failed: {}",
            result.error.as_deref().unwrap_or("failure indicators in output")
        );
        Ok(exit_codes::ROLLED_BACK)
    }
}

fn cmd_recover(root: &Path) -> Result<i32> {
    let Some(outcome) = recover(root)? else {
        println!("nothing to recover");
        return Ok(exit_codes::OK);
    };
    if outcome.complete() {
        println!(
            "restored {} file(s) from interrupted task: {}",
            outcome.entries, outcome.goal
        );
        Ok(exit_codes::OK)
    } else {
        println!("recovery incomplete:");
        for err in &outcome.errors {
            println!("  - {err}");
        }
        Ok(exit_codes::ROLLBACK_INCOMPLETE)
    }
}

/// Print `value` as pretty JSON with a trailing newline.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
