//! Prompt builder for the pinned conversation prefix.
//!
//! The prefix is the system prompt, optional few-shot exemplars rendered as
//! complete worked exchanges, and the task prompt. The task prompt ends with
//! a helper `Action:` block that runs the buggy solution against the example
//! test, which the control loop can execute without a generation round-trip.

use anyhow::Result;
use minijinja::{Environment, context};
use serde_json::json;

use crate::core::feedback;
use crate::core::types::{ExecutionResult, Tool, Turn};
use crate::io::task::Task;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// A solved task shown to the generator before the real one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exemplar {
    pub task: Task,
    pub solution: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }

    pub fn render_system(&self, max_iterations: u32) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            tool_name => Tool::CodeInterpreter.name(),
            max_iterations => max_iterations,
        })?;
        Ok(rendered)
    }

    pub fn render_task(&self, task: &Task) -> Result<String> {
        let template = self.env.get_template("task")?;
        let example_test = task.example_harness();
        let rendered = template.render(context! {
            instruction => task.instruction.trim(),
            buggy_solution => task.buggy_solution.trim(),
            example_test => example_test.as_deref().map(str::trim),
            tool_name => Tool::CodeInterpreter.name(),
            hint => tool_input(&task.buggy_solution, example_test.as_deref()),
        })?;
        Ok(rendered)
    }

    /// Build the pinned prefix: system prompt, exemplars, then the task prompt.
    pub fn build_prefix(
        &self,
        task: &Task,
        exemplars: &[Exemplar],
        max_iterations: u32,
    ) -> Result<Vec<Turn>> {
        let mut turns = vec![Turn::system(self.render_system(max_iterations)?)];
        for exemplar in exemplars {
            turns.extend(self.exemplar_turns(exemplar)?);
        }
        turns.push(Turn::user(self.render_task(task)?));
        Ok(turns)
    }

    fn exemplar_turns(&self, exemplar: &Exemplar) -> Result<Vec<Turn>> {
        let solution = exemplar.solution.trim();
        let harness = exemplar.task.example_harness();
        let passed = ExecutionResult::completed(0, String::new(), String::new());
        Ok(vec![
            Turn::user(self.render_task(&exemplar.task)?),
            Turn::assistant(format!(
                "Thought: I will run my corrected version against the example test.\nAction: {}\nAction Input: {}",
                Tool::CodeInterpreter.name(),
                tool_input(solution, harness.as_deref()),
            )),
            Turn::user(feedback::execution(&passed, 0)),
            Turn::assistant(format!(
                "Thought: The corrected function passes the test.\nFinal Answer:\n```python\n{solution}\n```"
            )),
        ])
    }
}

/// JSON `Action Input` for a code interpreter call.
pub fn tool_input(code: &str, harness: Option<&str>) -> String {
    match harness {
        Some(harness) => json!({ "code": code.trim(), "harness": harness.trim() }).to_string(),
        None => json!({ "code": code.trim() }).to_string(),
    }
}
