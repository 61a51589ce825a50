//! Case execution orchestration.
//!
//! Drives one repair attempt per case, scores the final code against the
//! hidden test, and persists per-case results and the run summary.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use repair::core::types::Turn;
use repair::io::config::RepairConfig;
use repair::io::generator::Generator;
use repair::io::prompt::{Exemplar, PromptEngine};
use repair::io::sandbox::CodeExecutor;
use repair::io::transcript::{TranscriptMeta, write_transcript};
use repair::looping::{AttemptConfig, AttemptOutcome, run_attempt};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::judge::{Judgment, judge_candidate};
use crate::outcome::{Outcome, classify_outcome};
use crate::report::ReportSummary;
use crate::results::{
    CaseResult, EvalSummary, file_sha256, transcript_dir, write_case_result, write_summary,
};

/// Settings shared by every case in one eval run.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    pub eval_run_id: &'a str,
    /// `<results>/<eval_run_id>`.
    pub eval_dir: &'a Path,
    pub base_config: &'a RepairConfig,
    /// Command-line `max_iterations`, applied after case overrides.
    pub max_iterations: Option<u32>,
    pub exemplars: &'a [Exemplar],
}

pub fn eval_run_id() -> String {
    format!("eval-{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Run every case in order, writing `<case_id>.json` for each and
/// `summary.json` at the end. `on_result` observes each case result.
#[instrument(skip_all, fields(eval_run_id = %ctx.eval_run_id, cases = cases.len()))]
pub fn run_cases<G: Generator, E: CodeExecutor, F: FnMut(&CaseResult)>(
    ctx: &EvalContext<'_>,
    cases: &[CaseFile],
    few_shot_ids: Vec<String>,
    generator: &G,
    executor: &E,
    mut on_result: F,
) -> Result<EvalSummary> {
    let started_at = Utc::now();
    let mut tally = ReportSummary::default();

    for case in cases {
        let result = run_case(ctx, case, generator, executor);
        write_case_result(ctx.eval_dir, &result)
            .with_context(|| format!("write result for case {}", result.case_id))?;
        tally.add(&result);
        on_result(&result);
    }

    let summary = EvalSummary {
        eval_run_id: ctx.eval_run_id.to_string(),
        cases: tally.cases,
        pass: tally.pass,
        fail: tally.fail,
        no_candidate: tally.no_candidate,
        error: tally.error,
        pass_at_1: tally.pass_at_1(),
        few_shot_ids,
        start_time: started_at.to_rfc3339(),
        end_time: Utc::now().to_rfc3339(),
    };
    write_summary(ctx.eval_dir, &summary).context("write summary")?;
    info!(
        pass = summary.pass,
        cases = summary.cases,
        pass_at_1 = summary.pass_at_1,
        "eval run complete"
    );
    Ok(summary)
}

/// Run and score one case. Host failures become `Outcome::Error`.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case<G: Generator, E: CodeExecutor>(
    ctx: &EvalContext<'_>,
    case: &CaseFile,
    generator: &G,
    executor: &E,
) -> CaseResult {
    let started_at = Utc::now();
    let case_hash = if case.path.as_os_str().is_empty() {
        String::new()
    } else {
        file_sha256(&case.path).unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "case hash failed");
            String::new()
        })
    };

    let mut result = CaseResult {
        case_id: case.case.id.clone(),
        eval_run_id: ctx.eval_run_id.to_string(),
        case_hash,
        outcome: Outcome::Error,
        stop: None,
        iterations: 0,
        max_iterations: 0,
        executions: 0,
        dropped_turns: 0,
        start_time: started_at.to_rfc3339(),
        end_time: String::new(),
        duration_secs: 0.0,
        code: None,
        judgment: None,
        error: None,
    };

    match attempt_and_judge(ctx, case, generator, executor, started_at) {
        Ok((outcome, judgment)) => {
            let code = outcome.stop.code().map(str::to_string);
            result.outcome = classify_outcome(code.as_deref(), judgment.as_ref());
            result.stop = Some(outcome.stop.label().to_string());
            result.iterations = outcome.iterations;
            result.max_iterations = outcome.max_iterations;
            result.executions = outcome.executions;
            result.dropped_turns = outcome.dropped_turns;
            result.code = code;
            result.judgment = judgment;
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "case errored");
            result.error = Some(format!("{err:#}"));
        }
    }

    let finished_at = Utc::now();
    result.end_time = finished_at.to_rfc3339();
    result.duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
    info!(outcome = result.outcome.as_str(), iterations = result.iterations, "case finished");
    result
}

fn attempt_and_judge<G: Generator, E: CodeExecutor>(
    ctx: &EvalContext<'_>,
    case: &CaseFile,
    generator: &G,
    executor: &E,
    started_at: DateTime<Utc>,
) -> Result<(AttemptOutcome, Option<Judgment>)> {
    let cfg = apply_case_config(ctx.base_config.clone(), &case.config, ctx.max_iterations)?;
    let task = case.task();
    let prefix = PromptEngine::new()
        .build_prefix(&task, ctx.exemplars, cfg.max_iterations)
        .context("render prompts")?;

    let outcome = run_attempt(
        prefix,
        task.example_harness(),
        generator,
        executor,
        &AttemptConfig::from_config(&cfg),
        |_: &Turn| {},
    )
    .context("repair attempt")?;

    save_transcript(ctx.eval_dir, &task.id, &outcome, started_at);

    let judgment = match outcome.stop.code() {
        Some(code) => Some(judge_candidate(executor, code, &case.case.test)?),
        None => None,
    };
    Ok((outcome, judgment))
}

fn save_transcript(
    eval_dir: &Path,
    case_id: &str,
    outcome: &AttemptOutcome,
    started_at: DateTime<Utc>,
) {
    let meta = TranscriptMeta {
        task_id: case_id.to_string(),
        stop: outcome.stop.label().to_string(),
        iterations: outcome.iterations,
        max_iterations: outcome.max_iterations,
        executions: outcome.executions,
        dropped_turns: outcome.dropped_turns,
        duration_ms: outcome.duration_ms,
        started_at: started_at.to_rfc3339(),
        code: outcome.stop.code().map(str::to_string),
    };
    let dir = transcript_dir(eval_dir, case_id);
    if let Err(err) = write_transcript(&dir, &meta, &outcome.turns) {
        warn!(error = %format!("{err:#}"), dir = %dir.display(), "transcript not written");
    }
}
