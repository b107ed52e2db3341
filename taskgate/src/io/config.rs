//! Project configuration stored under `.taskgate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::verdict::VerdictMode;

/// Directory (relative to the project root) holding config and journal.
pub const STATE_DIR: &str = ".taskgate";
/// Environment variable that overrides `gate.command`.
pub const TEST_COMMAND_ENV: &str = "TASKGATE_TEST_COMMAND";
/// Used when no project marker is recognized.
pub const FALLBACK_TEST_COMMAND: &str = "npm test";

/// Configuration (TOML).
///
/// Missing tables and fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TaskgateConfig {
    pub gate: GateConfig,
    pub planner: PlannerConfig,
    pub generator: GeneratorConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Shell command running the project's tests. Auto-detected when unset.
    pub command: Option<String>,
    pub timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes per stream.
    pub output_limit_bytes: usize,
    pub mode: VerdictMode,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            mode: VerdictMode::Heuristic,
        }
    }
}

impl GateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Command that reads a goal on stdin and prints one step per line.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads current content on stdin and prints the replacement.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
            output_limit_bytes: 4_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    /// Persist the compensation log so a crashed task can be recovered.
    pub enabled: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl TaskgateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gate.timeout_secs == 0 {
            return Err(anyhow!("gate.timeout_secs must be > 0"));
        }
        if self.gate.output_limit_bytes == 0 {
            return Err(anyhow!("gate.output_limit_bytes must be > 0"));
        }
        if let Some(command) = &self.gate.command
            && command.trim().is_empty()
        {
            return Err(anyhow!("gate.command must not be blank"));
        }
        if self.planner.timeout_secs == 0 {
            return Err(anyhow!("planner.timeout_secs must be > 0"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        for (name, command) in [
            ("planner.command", &self.planner.command),
            ("generator.command", &self.generator.command),
        ] {
            if command.first().is_some_and(|program| program.trim().is_empty()) {
                return Err(anyhow!("{name} must start with a program name"));
            }
        }
        Ok(())
    }
}

/// `<root>/.taskgate/config.toml`.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TaskgateConfig::default()`.
pub fn load_config(path: &Path) -> Result<TaskgateConfig> {
    if !path.exists() {
        let cfg = TaskgateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TaskgateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TaskgateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Pick the test command: environment override, then config, then project markers.
pub fn resolve_test_command(gate: &GateConfig, env_override: Option<&str>, root: &Path) -> String {
    if let Some(command) = env_override.map(str::trim).filter(|c| !c.is_empty()) {
        return command.to_string();
    }
    if let Some(command) = &gate.command {
        return command.clone();
    }
    detect_test_command(root).to_string()
}

/// Guess a test command from well-known project files.
pub fn detect_test_command(root: &Path) -> &'static str {
    const MARKERS: &[(&str, &str)] = &[
        ("Cargo.toml", "cargo test"),
        ("package.json", "npm test"),
        ("pyproject.toml", "pytest"),
        ("pytest.ini", "pytest"),
        ("go.mod", "go test ./..."),
    ];
    MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).is_file())
        .map(|(_, command)| *command)
        .unwrap_or(FALLBACK_TEST_COMMAND)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
