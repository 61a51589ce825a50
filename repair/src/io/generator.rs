//! Generation collaborator abstraction.
//!
//! The [`Generator`] trait decouples the control loop from the text
//! completion backend. Tests use scripted generators that return
//! predetermined turns without spawning processes.

use std::fmt;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::generation::GenerationConfig;
use crate::core::types::Turn;
use crate::io::process::run_isolated_with_timeout;

/// Abstraction over text-completion backends.
pub trait Generator {
    /// Produce the next assistant turn for `turns`.
    fn generate(&self, turns: &[Turn], config: &GenerationConfig) -> Result<String>;
}

/// The collaborator process failed, timed out, or exited without reading its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationError {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub input_unread: bool,
    pub stderr: String,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "generation command timed out")?;
        } else if self.input_unread {
            write!(f, "generation command exited without reading its input")?;
        } else {
            write!(f, "generation command failed with status {:?}", self.exit_code)?;
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

impl std::error::Error for GenerationError {}

#[derive(Serialize)]
struct GenerationInput<'a> {
    messages: &'a [Turn],
    config: &'a GenerationConfig,
}

/// Generator that spawns a configured command per call.
///
/// The command receives `{"messages": [...], "config": {...}}` as JSON on
/// stdin and must print the completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("generation command must not be empty"));
        }
        Ok(Self {
            command,
            output_limit_bytes,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(turns = turns.len(), max_new_tokens = config.max_new_tokens))]
    fn generate(&self, turns: &[Turn], config: &GenerationConfig) -> Result<String> {
        let input = serde_json::to_vec(&GenerationInput {
            messages: turns,
            config,
        })
        .context("serialize generation input")?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        let output = run_isolated_with_timeout(
            cmd,
            Some(&input),
            config.timeout(),
            self.output_limit_bytes,
        )
        .with_context(|| format!("run generation command {}", self.command[0]))?;

        if output.timed_out || !output.status.success() || !output.stdin_written {
            let err = GenerationError {
                exit_code: output.status.code(),
                timed_out: output.timed_out,
                input_unread: !output.timed_out && !output.stdin_written,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            warn!(%err, "generation command failed");
            return Err(err.into());
        }
        if output.stdout_truncated > 0 {
            warn!(
                truncated = output.stdout_truncated,
                "generation output truncated"
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        debug!(bytes = text.len(), "generation completed");
        Ok(text)
    }
}
