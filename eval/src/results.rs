//! Result persistence.
//!
//! Each eval run writes `<results>/<eval_run_id>/<case_id>.json` per scored
//! case plus `summary.json`. Attempt transcripts go under `transcripts/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::judge::Judgment;
use crate::outcome::Outcome;

pub const SUMMARY_FILE: &str = "summary.json";

/// Per-case record, persisted to `<case_id>.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaseResult {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    pub outcome: Outcome,
    /// `accepted` or `exhausted`; absent when the attempt errored.
    pub stop: Option<String>,
    pub iterations: u32,
    pub max_iterations: u32,
    pub executions: u32,
    pub dropped_turns: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Code that was scored.
    pub code: Option<String>,
    pub judgment: Option<Judgment>,
    pub error: Option<String>,
}

/// Run-level record, persisted to `summary.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalSummary {
    pub eval_run_id: String,
    pub cases: usize,
    pub pass: usize,
    pub fail: usize,
    pub no_candidate: usize,
    pub error: usize,
    pub pass_at_1: f64,
    /// Cases used as few-shot exemplars (not scored).
    pub few_shot_ids: Vec<String>,
    pub start_time: String,
    pub end_time: String,
}

pub fn eval_dir(base_dir: &Path, eval_run_id: &str) -> PathBuf {
    base_dir.join(eval_run_id)
}

pub fn case_result_path(eval_dir: &Path, case_id: &str) -> PathBuf {
    eval_dir.join(format!("{case_id}.json"))
}

pub fn transcript_dir(eval_dir: &Path, case_id: &str) -> PathBuf {
    eval_dir.join("transcripts").join(case_id)
}

#[instrument(skip_all, fields(case_id = %result.case_id))]
pub fn write_case_result(eval_dir: &Path, result: &CaseResult) -> Result<PathBuf> {
    fs::create_dir_all(eval_dir)
        .with_context(|| format!("create results dir {}", eval_dir.display()))?;
    let path = case_result_path(eval_dir, &result.case_id);
    write_json(&path, result)?;
    debug!(path = %path.display(), "case result written");
    Ok(path)
}

pub fn write_summary(eval_dir: &Path, summary: &EvalSummary) -> Result<PathBuf> {
    fs::create_dir_all(eval_dir)
        .with_context(|| format!("create results dir {}", eval_dir.display()))?;
    let path = eval_dir.join(SUMMARY_FILE);
    write_json(&path, summary)?;
    Ok(path)
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("serialize result")?;
    fs::write(path, format!("{contents}\n")).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
