//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{debug, info};

use repair::io::config::load_config;
use repair::io::generator::CommandGenerator;
use repair::io::prompt::Exemplar;
use repair::io::sandbox::PythonSandbox;

use crate::case::{discover_cases, select_cases};
use crate::report::aggregate;
use crate::results::eval_dir;
use crate::run::{EvalContext, eval_run_id, run_cases};

/// Options for `eval run`.
#[derive(Debug, Clone)]
pub struct RunOptions<'a> {
    pub cases_dir: &'a Path,
    pub results_dir: &'a Path,
    pub config_path: &'a Path,
    pub num: Option<usize>,
    pub few_shot_k: usize,
    pub max_iterations: Option<u32>,
}

/// List all available cases.
pub fn list_cases(cases_dir: &Path) -> Result<()> {
    let cases = discover_cases(cases_dir)?;
    for case in cases {
        let marker = if case.case.canonical_solution.is_some() {
            " (exemplar)"
        } else {
            ""
        };
        println!("{}{}", case.case.id, marker);
    }
    Ok(())
}

/// Run every selected case once and print pass@1.
pub fn run_eval(opts: &RunOptions<'_>) -> Result<()> {
    let cfg = load_config(opts.config_path)?;
    let cases = discover_cases(opts.cases_dir)?;
    if cases.is_empty() {
        bail!("no cases found in {}", opts.cases_dir.display());
    }
    let (exemplar_cases, scored) = select_cases(cases, opts.few_shot_k, opts.num);
    if scored.is_empty() {
        bail!("no cases left to score after selecting few-shot exemplars");
    }
    let exemplars: Vec<Exemplar> = exemplar_cases
        .iter()
        .filter_map(|case| case.exemplar())
        .collect();
    let few_shot_ids: Vec<String> = exemplar_cases
        .iter()
        .map(|case| case.case.id.clone())
        .collect();
    debug!(?few_shot_ids, scored = scored.len(), "cases selected");

    let generator = CommandGenerator::new(
        cfg.generation.command.clone(),
        cfg.generation.output_limit_bytes,
    )
    .context("configure generator")?;
    let sandbox = PythonSandbox::new(cfg.sandbox.clone());

    let eval_run_id = eval_run_id();
    let dir = eval_dir(opts.results_dir, &eval_run_id);
    let ctx = EvalContext {
        eval_run_id: &eval_run_id,
        eval_dir: &dir,
        base_config: &cfg,
        max_iterations: opts.max_iterations,
        exemplars: &exemplars,
    };
    info!(%eval_run_id, cases = scored.len(), "starting eval run");

    let summary = run_cases(&ctx, &scored, few_shot_ids, &generator, &sandbox, |result| {
        let line = json!({
            "case_id": result.case_id,
            "outcome": result.outcome,
            "iterations": result.iterations,
            "duration_secs": result.duration_secs,
            "error": result.error,
        });
        println!("{line}");
    })?;

    println!(
        "{}",
        json!({
            "eval_run_id": summary.eval_run_id,
            "pass_at_1": summary.pass_at_1,
            "pass": summary.pass,
            "cases": summary.cases,
            "results": dir.display().to_string(),
        })
    );
    Ok(())
}

/// Re-aggregate stored per-case results for an eval run.
pub fn report_run(results_dir: &Path, eval_run_id: &str) -> Result<()> {
    let dir = eval_dir(results_dir, eval_run_id);
    if !dir.exists() {
        bail!("eval run {} not found at {}", eval_run_id, dir.display());
    }
    let (summary, warnings) = aggregate(&dir)?;
    println!("report: eval_run_id={} cases={}", eval_run_id, summary.cases);
    println!(
        "report: pass={} fail={} no_candidate={} error={}",
        summary.pass, summary.fail, summary.no_candidate, summary.error
    );
    println!("report: pass@1={:.4}", summary.pass_at_1());
    if let Some(avg) = summary.avg_iterations {
        println!("report: avg_iterations={:.2}", avg);
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}
