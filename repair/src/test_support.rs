//! Test-only collaborators for driving the repair loop without a model.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::process::{Command, Stdio};

use anyhow::{Result, anyhow};

use crate::core::generation::GenerationConfig;
use crate::core::types::{ExecutionRequest, ExecutionResult, Turn};
use crate::io::generator::Generator;
use crate::io::sandbox::CodeExecutor;

/// One recorded `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub turns: Vec<Turn>,
    pub config: GenerationConfig,
}

/// Generator that replays queued completions.
pub struct ScriptedGenerator {
    queue: RefCell<VecDeque<String>>,
    repeat: Option<String>,
    calls: RefCell<Vec<GenerateCall>>,
}

impl ScriptedGenerator {
    /// Replay `outputs` in order, then fail.
    pub fn new(outputs: Vec<&str>) -> Self {
        Self {
            queue: RefCell::new(outputs.into_iter().map(str::to_string).collect()),
            repeat: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Return `output` for every call.
    pub fn repeating(output: &str) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            repeat: Some(output.to_string()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, turns: &[Turn], config: &GenerationConfig) -> Result<String> {
        self.calls.borrow_mut().push(GenerateCall {
            turns: turns.to_vec(),
            config: config.clone(),
        });
        if let Some(next) = self.queue.borrow_mut().pop_front() {
            return Ok(next);
        }
        self.repeat
            .clone()
            .ok_or_else(|| anyhow!("scripted generator has no output left"))
    }
}

type ExecuteFn = Box<dyn Fn(&ExecutionRequest) -> ExecutionResult>;

enum ExecSource {
    Queue(RefCell<VecDeque<ExecutionResult>>),
    Func(ExecuteFn),
}

/// Executor that returns scripted results and records every request.
pub struct ScriptedExecutor {
    source: ExecSource,
    requests: RefCell<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    /// Return `results` in order, then fail.
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            source: ExecSource::Queue(RefCell::new(results.into())),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Compute each result from the request.
    pub fn from_fn(f: impl Fn(&ExecutionRequest) -> ExecutionResult + 'static) -> Self {
        Self {
            source: ExecSource::Func(Box::new(f)),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Every execution succeeds.
    pub fn passing() -> Self {
        Self::from_fn(|_| ExecutionResult::completed(0, String::new(), String::new()))
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.borrow().clone()
    }
}

impl CodeExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.requests.borrow_mut().push(request.clone());
        match &self.source {
            ExecSource::Queue(queue) => queue
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("scripted executor has no result left")),
            ExecSource::Func(f) => Ok(f(request)),
        }
    }
}

/// Failed execution with an assertion error on stderr.
pub fn assertion_failure() -> ExecutionResult {
    ExecutionResult::completed(
        1,
        String::new(),
        "Traceback (most recent call last):\nAssertionError\n".to_string(),
    )
}

/// Whether `python3` can be spawned. Tests needing a real interpreter skip otherwise.
pub fn python_available() -> bool {
    Command::new("python3")
        .args(["-c", "import sys"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Tool call turn in the format the parser accepts.
pub fn tool_call_turn(code: &str, harness: Option<&str>) -> String {
    format!(
        "Thought: run it\nAction: code_interpreter\nAction Input: {}",
        crate::io::prompt::tool_input(code, harness)
    )
}

/// Final answer turn in the format the parser accepts.
pub fn final_answer_turn(code: &str) -> String {
    format!("Thought: done\nFinal Answer:\n```python\n{code}\n```")
}
