//! Pass/fail classification of captured test output.
//!
//! The default heuristic is textual: output containing `FAIL` (case-sensitive)
//! or `failing` (any case) is a failure. The exit code alone is never
//! authoritative because some frameworks exit 0 on partial failure in watch or
//! report modes. `Strict` adds exit-code and structured-report checks in front
//! of the same textual fallback.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How test output is classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictMode {
    #[default]
    Heuristic,
    Strict,
}

/// Raw facts about one finished test run.
#[derive(Debug, Clone, Copy)]
pub struct RunFacts<'a> {
    pub output: &'a str,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Return true when the run counts as passing under `mode`.
pub fn passed(mode: VerdictMode, facts: &RunFacts<'_>) -> bool {
    if facts.timed_out || facts.cancelled {
        return false;
    }
    match mode {
        VerdictMode::Heuristic => text_passes(facts.output),
        VerdictMode::Strict => {
            if facts.exit_code != Some(0) {
                return false;
            }
            if has_tap_failure(facts.output) || has_junit_failure(facts.output) {
                return false;
            }
            text_passes(facts.output)
        }
    }
}

/// The plain textual heuristic.
pub fn text_passes(output: &str) -> bool {
    !output.contains("FAIL") && !output.to_lowercase().contains("failing")
}

fn has_tap_failure(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.trim_start().starts_with("not ok"))
}

fn has_junit_failure(output: &str) -> bool {
    static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"\b(?:failures|errors)="(\d+)""#).expect("junit count pattern compiles")
    });
    if output.contains("<failure") || output.contains("<error") {
        return true;
    }
    COUNT_RE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .any(|count| count > 0)
}

/// Last `max_lines` non-empty lines of `output`, for error summaries.
pub fn tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
