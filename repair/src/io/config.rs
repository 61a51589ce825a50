//! Repair configuration stored in `repair.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::generation::{GenerationConfig, GenerationProfiles};

pub const DEFAULT_CONFIG_FILE: &str = "repair.toml";

/// Repair configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    /// Ceiling on `Generate` passes per attempt.
    pub max_iterations: u32,

    pub sandbox: SandboxConfig,
    pub conversation: ConversationConfig,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter executable, resolved through `PATH` when not absolute.
    pub python: PathBuf,

    /// Default wall-clock limit per execution.
    pub timeout_secs: f64,

    /// Upper bound applied to timeouts requested by tool calls.
    pub max_timeout_secs: f64,

    /// Per-stream capture ceiling; bytes past it are dropped with a notice.
    pub output_limit_bytes: usize,

    /// Reject unparsable code before spawning the interpreter.
    pub syntax_precheck: bool,

    /// `RLIMIT_CPU` applied inside the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit_secs: Option<u64>,

    /// `RLIMIT_AS` applied inside the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,

    /// Host environment variables forwarded to the child.
    pub pass_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            timeout_secs: 8.0,
            max_timeout_secs: 60.0,
            output_limit_bytes: 64 * 1024,
            syntax_precheck: true,
            cpu_limit_secs: Some(10),
            memory_limit_mb: Some(1024),
            pass_env: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Saturates at [`Duration::MAX`]; `validate` rejects values that do not fit.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_timeout_secs).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.python.as_os_str().is_empty() {
            return Err(anyhow!("sandbox.python must not be empty"));
        }
        if self.timeout_secs <= 0.0 || Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            return Err(anyhow!("sandbox.timeout_secs must be a positive number of seconds"));
        }
        if Duration::try_from_secs_f64(self.max_timeout_secs).is_err()
            || self.max_timeout_secs < self.timeout_secs
        {
            return Err(anyhow!("sandbox.max_timeout_secs must be >= sandbox.timeout_secs"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.cpu_limit_secs == Some(0) {
            return Err(anyhow!("sandbox.cpu_limit_secs must be > 0 when set"));
        }
        if self.memory_limit_mb == Some(0) {
            return Err(anyhow!("sandbox.memory_limit_mb must be > 0 when set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConversationConfig {
    /// Total size of all turns before the oldest unpinned turns are dropped.
    pub budget_bytes: usize,

    /// Characters of stdout/stderr quoted per observation.
    pub feedback_excerpt_chars: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 200_000,
            feedback_excerpt_chars: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    /// Collaborator command (e.g. `["python3", "generate.py"]`).
    pub command: Vec<String>,

    /// Ceiling on the completion read from the collaborator's stdout.
    pub output_limit_bytes: usize,

    /// Settings used while a code payload is expected.
    pub payload: GenerationConfig,

    /// Settings used while a short conclusion is expected.
    pub rationale: GenerationConfig,
}

impl GenerationSettings {
    pub fn profiles(&self) -> GenerationProfiles {
        GenerationProfiles {
            payload: self.payload.clone(),
            rationale: self.rationale.clone(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            command: vec!["repair-generate".to_string()],
            output_limit_bytes: 1_000_000,
            payload: GenerationConfig::payload(),
            rationale: GenerationConfig::rationale(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            sandbox: SandboxConfig::default(),
            conversation: ConversationConfig::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        self.sandbox.validate()?;
        if self.conversation.budget_bytes == 0 {
            return Err(anyhow!("conversation.budget_bytes must be > 0"));
        }
        if self.conversation.feedback_excerpt_chars == 0 {
            return Err(anyhow!("conversation.feedback_excerpt_chars must be > 0"));
        }
        if self.generation.command.is_empty() || self.generation.command[0].trim().is_empty() {
            return Err(anyhow!("generation.command must be a non-empty array"));
        }
        if self.generation.output_limit_bytes == 0 {
            return Err(anyhow!("generation.output_limit_bytes must be > 0"));
        }
        self.generation.profiles().validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RepairConfig::default()`.
pub fn load_config(path: &Path) -> Result<RepairConfig> {
    if !path.exists() {
        let cfg = RepairConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RepairConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RepairConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
