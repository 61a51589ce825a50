//! Act and Verify steps of a repair attempt.
//!
//! Both steps run candidate code through a [`CodeExecutor`]; they differ in
//! where the harness comes from and in how the loop reacts to the result.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::harness::{normalize, split_entry_point, strip_injected};
use crate::core::types::{ExecutionRequest, ExecutionResult, ToolPayload};
use crate::io::sandbox::CodeExecutor;

/// Harness carried between tool calls.
///
/// Seeded with the task's example test. A tool call that supplies a harness
/// replaces it; a tool call without one inherits it. Verification always
/// uses the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarriedHarness(Option<String>);

impl CarriedHarness {
    pub fn new(initial: Option<String>) -> Self {
        Self(initial.filter(|harness| !harness.trim().is_empty()))
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Harness for `payload`, updating the carried value when the payload brings its own.
    pub fn resolve(&mut self, payload: &ToolPayload) -> Option<String> {
        if let Some(harness) = payload
            .harness
            .as_ref()
            .filter(|harness| !harness.trim().is_empty())
        {
            self.0 = Some(harness.clone());
        }
        self.0.clone()
    }
}

/// Run a tool call's code with its harness.
pub fn act<E: CodeExecutor>(
    executor: &E,
    payload: &ToolPayload,
    carried: &mut CarriedHarness,
) -> Result<ExecutionResult> {
    let harness = carried.resolve(payload);
    let mut request = ExecutionRequest::new(payload.code.clone(), harness);
    if let Some(timeout) = payload
        .timeout
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    {
        request = request.with_timeout(timeout);
    }
    let result = executor.execute(&request).context("execute tool call")?;
    debug!(ok = result.ok(), exit_code = result.exit_code, "act finished");
    Ok(result)
}

/// Re-run a declared final answer against the carried harness.
pub fn verify<E: CodeExecutor>(
    executor: &E,
    code: &str,
    carried: &CarriedHarness,
) -> Result<ExecutionResult> {
    let request = ExecutionRequest::new(code, carried.get().map(str::to_string));
    let result = executor
        .execute(&request)
        .context("verify final answer")?;
    info!(
        ok = result.ok(),
        has_harness = carried.get().is_some(),
        "final answer verified"
    );
    Ok(result)
}

/// Clean candidate code for reporting after the budget ran out.
///
/// Removes injected entry-point blocks and any trailing `__main__` section
/// the model added, keeping only the definitions.
pub fn best_effort_code(code: &str) -> Option<String> {
    let stripped = strip_injected(code);
    let cleaned = normalize(split_entry_point(&stripped));
    (!cleaned.is_empty()).then_some(cleaned)
}
