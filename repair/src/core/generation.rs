//! Request-scoped generation settings.
//!
//! The control loop picks a [`GenerationPhase`] per pass and hands the
//! matching [`GenerationConfig`] to the generator explicitly.

use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// What the loop expects the next completion to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    /// A tool call with a code payload (after the task prompt or a failure).
    Payload,
    /// A short conclusion, usually the final answer, after a passing run.
    Rationale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: u32,
    pub min_new_tokens: u32,
    pub timeout_secs: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::payload()
    }
}

impl GenerationConfig {
    pub fn payload() -> Self {
        Self {
            max_new_tokens: 1024,
            min_new_tokens: 0,
            timeout_secs: 300.0,
            temperature: 0.0,
            repetition_penalty: 1.0,
        }
    }

    pub fn rationale() -> Self {
        Self {
            max_new_tokens: 512,
            timeout_secs: 120.0,
            ..Self::payload()
        }
    }

    /// Saturates at [`Duration::MAX`]; `validate` rejects values that do not fit.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self, label: &str) -> Result<()> {
        if self.max_new_tokens == 0 {
            bail!("{label}.max_new_tokens must be > 0");
        }
        if self.min_new_tokens > self.max_new_tokens {
            bail!("{label}.min_new_tokens must be <= max_new_tokens");
        }
        if self.timeout_secs <= 0.0 || Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            bail!("{label}.timeout_secs must be a positive number of seconds");
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            bail!("{label}.temperature must be >= 0");
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            bail!("{label}.repetition_penalty must be > 0");
        }
        Ok(())
    }
}

/// Per-phase generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationProfiles {
    pub payload: GenerationConfig,
    pub rationale: GenerationConfig,
}

impl Default for GenerationProfiles {
    fn default() -> Self {
        Self {
            payload: GenerationConfig::payload(),
            rationale: GenerationConfig::rationale(),
        }
    }
}

impl GenerationProfiles {
    pub fn for_phase(&self, phase: GenerationPhase) -> &GenerationConfig {
        match phase {
            GenerationPhase::Payload => &self.payload,
            GenerationPhase::Rationale => &self.rationale,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.payload.validate("generation.payload")?;
        self.rationale.validate("generation.rationale")
    }
}
