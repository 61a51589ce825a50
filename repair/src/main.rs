//! Iterative code-repair agent CLI.
//!
//! `repair run` drives one attempt for a task file, `repair exec` runs a
//! single sandboxed execution, `repair init` writes the default config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use repair::core::types::{ExecutionRequest, ExecutionResult, Turn};
use repair::exit_codes;
use repair::io::config::{DEFAULT_CONFIG_FILE, RepairConfig, load_config, write_config};
use repair::io::generator::CommandGenerator;
use repair::io::prompt::PromptEngine;
use repair::io::sandbox::{CodeExecutor, PythonSandbox};
use repair::io::task::load_task;
use repair::io::transcript::{TranscriptMeta, write_transcript};
use repair::logging;
use repair::looping::{AttemptConfig, AttemptStop, run_attempt};

#[derive(Parser)]
#[command(
    name = "repair",
    version,
    about = "Iterative code-repair agent with sandboxed execution"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one repair attempt for a task file and print the result as JSON.
    Run {
        /// Task file (TOML with a `[task]` table).
        #[arg(long)]
        task: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Directory for `transcript.json` and `meta.json`.
        #[arg(long)]
        transcript: Option<PathBuf>,
        /// Echo every turn to stderr as it is appended.
        #[arg(long)]
        show_turns: bool,
    },
    /// Run code (plus an optional harness) once in the sandbox.
    Exec {
        /// File with the code to run.
        #[arg(long)]
        code: PathBuf,
        /// File with test code run after `code`.
        #[arg(long)]
        harness: Option<PathBuf>,
        /// Wall-clock limit in seconds (clamped to `sandbox.max_timeout_secs`).
        #[arg(long)]
        timeout: Option<f64>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct RunReport<'a> {
    task_id: &'a str,
    #[serde(flatten)]
    stop: &'a AttemptStop,
    iterations: u32,
    max_iterations: u32,
    executions: u32,
    duration_ms: u64,
}

#[derive(Serialize)]
struct ExecReport<'a> {
    ok: bool,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            config,
            max_iterations,
            transcript,
            show_turns,
        } => cmd_run(
            &task,
            &config,
            max_iterations,
            transcript.as_deref(),
            show_turns,
        ),
        Command::Exec {
            code,
            harness,
            timeout,
            config,
        } => cmd_exec(&code, harness.as_deref(), timeout, &config),
        Command::Init { force, config } => cmd_init(&config, force),
    }
}

fn cmd_run(
    task_path: &Path,
    config_path: &Path,
    max_iterations: Option<u32>,
    transcript: Option<&Path>,
    show_turns: bool,
) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    if let Some(max_iterations) = max_iterations {
        cfg.max_iterations = max_iterations;
        cfg.validate()?;
    }
    let task = load_task(task_path)?;
    let started_at = Utc::now().to_rfc3339();

    let prefix = PromptEngine::new()
        .build_prefix(&task, &[], cfg.max_iterations)
        .context("render prompts")?;
    let generator = CommandGenerator::new(
        cfg.generation.command.clone(),
        cfg.generation.output_limit_bytes,
    )?;
    let sandbox = PythonSandbox::new(cfg.sandbox.clone());

    let outcome = run_attempt(
        prefix,
        task.example_harness(),
        &generator,
        &sandbox,
        &AttemptConfig::from_config(&cfg),
        |turn: &Turn| {
            if show_turns {
                eprintln!("--- {:?}\n{}", turn.role, turn.content);
            }
        },
    )
    .with_context(|| format!("repair attempt for task {}", task.id))?;

    if let Some(dir) = transcript {
        let meta = TranscriptMeta {
            task_id: task.id.clone(),
            stop: outcome.stop.label().to_string(),
            iterations: outcome.iterations,
            max_iterations: outcome.max_iterations,
            executions: outcome.executions,
            dropped_turns: outcome.dropped_turns,
            duration_ms: outcome.duration_ms,
            started_at,
            code: outcome.stop.code().map(str::to_string),
        };
        write_transcript(dir, &meta, &outcome.turns)?;
    }

    let report = RunReport {
        task_id: &task.id,
        stop: &outcome.stop,
        iterations: outcome.iterations,
        max_iterations: outcome.max_iterations,
        executions: outcome.executions,
        duration_ms: outcome.duration_ms,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize result")?
    );

    Ok(if outcome.stop.is_accepted() {
        exit_codes::OK
    } else {
        exit_codes::EXHAUSTED
    })
}

fn cmd_exec(
    code_path: &Path,
    harness_path: Option<&Path>,
    timeout: Option<f64>,
    config_path: &Path,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let code =
        fs::read_to_string(code_path).with_context(|| format!("read {}", code_path.display()))?;
    let harness = harness_path
        .map(|path| fs::read_to_string(path).with_context(|| format!("read {}", path.display())))
        .transpose()?;

    let mut request = ExecutionRequest::new(code, harness);
    if let Some(secs) = timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| anyhow!("--timeout must be a positive number of seconds"))?;
        request = request.with_timeout(timeout);
    }

    let result = PythonSandbox::new(cfg.sandbox).execute(&request)?;
    let report = ExecReport {
        ok: result.ok(),
        result: &result,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize result")?
    );
    Ok(if result.ok() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &RepairConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}
