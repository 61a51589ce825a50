mod case;
mod cli;
mod config;
mod judge;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use repair::io::config::DEFAULT_CONFIG_FILE;
use repair::logging;

#[derive(Parser)]
#[command(name = "eval", version, about = "pass@1 evaluation for the repair agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List case ids.
    List {
        #[arg(long, default_value = "eval/cases")]
        cases: PathBuf,
    },
    /// Run one attempt per case and score it against the hidden test.
    Run {
        #[arg(long, default_value = "eval/cases")]
        cases: PathBuf,
        #[arg(long, default_value = "eval/results")]
        results: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Score at most this many cases.
        #[arg(long)]
        num: Option<usize>,
        /// Cases with a canonical solution used as few-shot exemplars.
        #[arg(long, default_value_t = 0)]
        few_shot_k: usize,
        /// Override `max_iterations` for every case.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Re-aggregate stored results for an eval run.
    Report {
        eval_run_id: String,
        #[arg(long, default_value = "eval/results")]
        results: PathBuf,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::List { cases } => cli::list_cases(&cases),
        Command::Run {
            cases,
            results,
            config,
            num,
            few_shot_k,
            max_iterations,
        } => cli::run_eval(&cli::RunOptions {
            cases_dir: &cases,
            results_dir: &results,
            config_path: &config,
            num,
            few_shot_k,
            max_iterations,
        }),
        Command::Report {
            eval_run_id,
            results,
        } => cli::report_run(&results, &eval_run_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["eval", "run"]);
        match cli.command {
            Command::Run {
                cases,
                results,
                num,
                few_shot_k,
                max_iterations,
                ..
            } => {
                assert_eq!(cases, PathBuf::from("eval/cases"));
                assert_eq!(results, PathBuf::from("eval/results"));
                assert_eq!(num, None);
                assert_eq!(few_shot_k, 0);
                assert_eq!(max_iterations, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "eval",
            "run",
            "--num",
            "5",
            "--few-shot-k",
            "2",
            "--max-iterations",
            "4",
        ]);
        assert!(matches!(
            cli.command,
            Command::Run {
                num: Some(5),
                few_shot_k: 2,
                max_iterations: Some(4),
                ..
            }
        ));
    }

    #[test]
    fn parse_report() {
        let cli = Cli::parse_from(["eval", "report", "eval-20260101_000000"]);
        assert!(matches!(cli.command, Command::Report { .. }));
    }
}
