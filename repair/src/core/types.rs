//! Shared deterministic types for the repair core.
//!
//! These types define stable contracts between the parser, the harness
//! composer, the sandbox and the control loop. They must not depend on
//! external state or I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation handed to the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Decoded `Action Input` payload of a tool invocation.
///
/// Unknown fields in the wire payload are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness: Option<String>,
    /// Requested wall-clock limit in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

/// A tool invocation declared by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    pub payload: ToolPayload,
}

/// Structured intent recovered from one assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedIntent {
    ToolCall(ToolCall),
    FinalAnswer { code: String },
    Malformed { reason: String },
}

/// Tools the control loop can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    CodeInterpreter,
}

impl Tool {
    pub const ALL: [Tool; 1] = [Tool::CodeInterpreter];

    pub fn name(self) -> &'static str {
        match self {
            Tool::CodeInterpreter => "code_interpreter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Request for one sandboxed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    pub harness: Option<String>,
    /// Overrides the sandbox default when set.
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, harness: Option<String>) -> Self {
        Self {
            code: code.into(),
            harness,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Exit code reported when the child never produced one (killed by a signal or timeout).
pub const NO_EXIT_CODE: i32 = -1;

/// Exit code used for requests rejected before a process was spawned.
pub const REJECTED_EXIT_CODE: i32 = 1;

/// Outcome of one sandboxed execution.
///
/// `ok()` is derived, so `ok == (exit_code == 0 && !timed_out)` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn completed(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        }
    }

    pub fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: NO_EXIT_CODE,
            stdout,
            stderr,
            timed_out: true,
        }
    }

    /// Failure synthesized without spawning a process.
    pub fn rejected(stderr: impl Into<String>) -> Self {
        Self {
            exit_code: REJECTED_EXIT_CODE,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    pub fn ok(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}
