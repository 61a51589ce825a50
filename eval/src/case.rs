//! Case file parsing and validation.
//!
//! Cases are TOML files with a buggy solution, a visible example test and a
//! hidden test used only for scoring. See `eval/cases/` for examples.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use repair::io::prompt::Exemplar;
use repair::io::task::Task;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    /// Where the case was loaded from.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub instruction: String,
    pub buggy_solution: String,
    /// Visible to the agent.
    #[serde(default)]
    pub example_test: String,
    /// Hidden test; never part of the agent's prompt.
    pub test: String,
    /// Known fix; lets the case serve as a few-shot exemplar.
    #[serde(default)]
    pub canonical_solution: Option<String>,
}

/// Repair configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_iterations: Option<u32>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let mut case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        case.path = path.to_path_buf();
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.instruction.trim().is_empty() {
            bail!("case.instruction must be non-empty");
        }
        if self.case.buggy_solution.trim().is_empty() {
            bail!("case.buggy_solution must be non-empty");
        }
        if self.case.test.trim().is_empty() {
            bail!("case.test must be non-empty");
        }
        if let Some(solution) = &self.case.canonical_solution
            && solution.trim().is_empty()
        {
            bail!("case.canonical_solution must be non-empty when set");
        }
        if let Some(max_iterations) = self.config.max_iterations
            && max_iterations == 0
        {
            bail!("config.max_iterations must be > 0");
        }
        Ok(())
    }

    /// The agent-facing task. The hidden test is left out.
    pub fn task(&self) -> Task {
        Task {
            id: self.case.id.clone(),
            instruction: self.case.instruction.clone(),
            buggy_solution: self.case.buggy_solution.clone(),
            example_test: self.case.example_test.clone(),
        }
    }

    pub fn exemplar(&self) -> Option<Exemplar> {
        self.case.canonical_solution.as_ref().map(|solution| Exemplar {
            task: self.task(),
            solution: solution.clone(),
        })
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

/// Split cases into few-shot exemplars and cases to score.
///
/// The first `k` cases with a canonical solution become exemplars and are
/// excluded from scoring; at most `num` of the remaining cases are scored.
pub fn select_cases(
    cases: Vec<CaseFile>,
    few_shot_k: usize,
    num: Option<usize>,
) -> (Vec<CaseFile>, Vec<CaseFile>) {
    let mut exemplars = Vec::new();
    let mut scored = Vec::new();
    for case in cases {
        if exemplars.len() < few_shot_k && case.case.canonical_solution.is_some() {
            exemplars.push(case);
        } else {
            scored.push(case);
        }
    }
    if let Some(num) = num {
        scored.truncate(num);
    }
    (exemplars, scored)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
