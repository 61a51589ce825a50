use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::outcome::Outcome;
use crate::results::{CaseResult, SUMMARY_FILE};

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct ReportSummary {
    pub cases: usize,
    pub pass: usize,
    pub fail: usize,
    pub no_candidate: usize,
    pub error: usize,
    pub avg_iterations: Option<f64>,
    pub avg_duration_secs: Option<f64>,
}

impl ReportSummary {
    pub fn add(&mut self, result: &CaseResult) {
        self.cases += 1;
        match result.outcome {
            Outcome::Pass => self.pass += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::NoCandidate => self.no_candidate += 1,
            Outcome::Error => self.error += 1,
        }
        self.avg_iterations = Some(running_mean(
            self.avg_iterations,
            self.cases,
            f64::from(result.iterations),
        ));
        self.avg_duration_secs = Some(running_mean(
            self.avg_duration_secs,
            self.cases,
            result.duration_secs,
        ));
    }

    /// Fraction of scored cases that passed. Errors count as misses.
    pub fn pass_at_1(&self) -> f64 {
        if self.cases == 0 {
            0.0
        } else {
            self.pass as f64 / self.cases as f64
        }
    }
}

fn running_mean(avg: Option<f64>, count: usize, value: f64) -> f64 {
    match avg {
        None => value,
        Some(avg) => (avg * (count as f64 - 1.0) + value) / count as f64,
    }
}

/// Per-case result files in an eval run directory, sorted.
pub fn load_result_files(eval_dir: &Path) -> Result<Vec<PathBuf>> {
    if !eval_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(eval_dir).with_context(|| format!("read {}", eval_dir.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if path.file_name().and_then(|name| name.to_str()) == Some(SUMMARY_FILE) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

pub fn aggregate(eval_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for path in load_result_files(eval_dir)? {
        let result: CaseResult = match fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse case result"))
        {
            Ok(result) => result,
            Err(err) => {
                warnings.push(format!("skip {}: invalid ({err:#})", path.display()));
                continue;
            }
        };
        summary.add(&result);
    }

    Ok((summary, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::write_case_result;
    use tempfile::tempdir;

    fn result(case_id: &str, outcome: Outcome, iterations: u32, duration: f64) -> CaseResult {
        CaseResult {
            case_id: case_id.to_string(),
            eval_run_id: "eval-1".to_string(),
            case_hash: "hash".to_string(),
            outcome,
            stop: None,
            iterations,
            max_iterations: 8,
            executions: 0,
            dropped_turns: 0,
            start_time: "t0".to_string(),
            end_time: "t1".to_string(),
            duration_secs: duration,
            code: None,
            judgment: None,
            error: None,
        }
    }

    #[test]
    fn aggregates_outcomes_and_averages() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        write_case_result(dir, &result("a", Outcome::Pass, 2, 1.0)).expect("a");
        write_case_result(dir, &result("b", Outcome::Fail, 4, 3.0)).expect("b");
        write_case_result(dir, &result("c", Outcome::NoCandidate, 6, 2.0)).expect("c");
        write_case_result(dir, &result("d", Outcome::Pass, 4, 2.0)).expect("d");
        fs::write(dir.join(SUMMARY_FILE), "{}").expect("summary");

        let (summary, warnings) = aggregate(dir).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.cases, 4);
        assert_eq!(summary.pass, 2);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.no_candidate, 1);
        assert_eq!(summary.error, 0);
        assert_eq!(summary.avg_iterations, Some(4.0));
        assert_eq!(summary.avg_duration_secs, Some(2.0));
        assert_eq!(summary.pass_at_1(), 0.5);
    }

    #[test]
    fn warns_on_invalid_files() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        write_case_result(dir, &result("a", Outcome::Error, 1, 1.0)).expect("a");
        fs::write(dir.join("broken.json"), "not json").expect("broken");

        let (summary, warnings) = aggregate(dir).expect("aggregate");
        assert_eq!(summary.cases, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken.json"));
    }

    #[test]
    fn empty_run_has_zero_pass_rate() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("missing")).expect("aggregate");
        assert_eq!(summary.cases, 0);
        assert!(warnings.is_empty());
        assert_eq!(summary.pass_at_1(), 0.0);
    }
}
