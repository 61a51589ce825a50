//! Hidden-test scoring.
//!
//! Runs the agent's final code against the case's hidden test in the same
//! sandbox the agent used, and records the result.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use repair::core::feedback::excerpt;
use repair::core::types::ExecutionRequest;
use repair::io::sandbox::CodeExecutor;

/// Output kept per stream in stored judgments.
pub const JUDGMENT_EXCERPT_CHARS: usize = 2_000;

/// Result of running the hidden test against a candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judgment {
    pub passed: bool,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Execute `code` followed by the hidden `test`.
///
/// Errors only when the sandbox itself fails; a failing test is a
/// `Judgment` with `passed == false`.
#[instrument(skip_all)]
pub fn judge_candidate<E: CodeExecutor + ?Sized>(
    executor: &E,
    code: &str,
    test: &str,
) -> Result<Judgment> {
    let request = ExecutionRequest::new(code.to_string(), Some(test.to_string()));
    let result = executor.execute(&request).context("run hidden test")?;
    debug!(
        exit_code = result.exit_code,
        timed_out = result.timed_out,
        "hidden test finished"
    );
    Ok(Judgment {
        passed: result.ok(),
        exit_code: result.exit_code,
        timed_out: result.timed_out,
        stdout: excerpt(&result.stdout, JUDGMENT_EXCERPT_CHARS),
        stderr: excerpt(&result.stderr, JUDGMENT_EXCERPT_CHARS),
    })
}
