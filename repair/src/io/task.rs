//! Repair task files (`[task]` table in TOML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// One repair task as seen by the agent. Hidden tests never live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub instruction: String,
    pub buggy_solution: String,
    /// Visible test used as the initial harness.
    #[serde(default)]
    pub example_test: String,
}

impl Task {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("task.id must not be empty");
        }
        if self.instruction.trim().is_empty() {
            bail!("task.instruction must not be empty");
        }
        if self.buggy_solution.trim().is_empty() {
            bail!("task.buggy_solution must not be empty");
        }
        Ok(())
    }

    /// Example test as a harness, `None` when the task has none.
    pub fn example_harness(&self) -> Option<String> {
        let test = self.example_test.trim();
        (!test.is_empty()).then(|| self.example_test.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    task: Task,
}

pub fn load_task(path: &Path) -> Result<Task> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: TaskFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    file.task
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(file.task)
}
