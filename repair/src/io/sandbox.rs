//! Sandboxed execution of candidate code.
//!
//! [`PythonSandbox`] is best-effort process confinement, not a security
//! boundary. Each call gets a fresh interpreter started in isolated mode
//! (`-I -S -B`, no user site, no `site` import, no bytecode files), a cleared
//! environment, a private scratch directory that is removed before the call
//! returns, a wall-clock timeout and optional CPU/address-space rlimits. The
//! code can still reach the network and any path the host user can.

use std::env;
use std::fs;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::harness::{self, compose};
use crate::core::syntax::check_syntax;
use crate::core::types::{ExecutionRequest, ExecutionResult};
use crate::io::config::SandboxConfig;
use crate::io::process::run_isolated_with_timeout;

const SCRIPT_FILE: &str = "snippet.py";

/// Applies rlimits, then runs the script file as `__main__`.
///
/// argv: `<cpu seconds|-> <address space bytes|-> <script path>`.
const BOOTSTRAP: &str = r#"import sys

def _apply_limits(cpu, memory):
    try:
        import resource
    except ImportError:
        return
    for name, value in (("RLIMIT_CPU", cpu), ("RLIMIT_AS", memory)):
        if value == "-" or not hasattr(resource, name):
            continue
        kind = getattr(resource, name)
        try:
            _soft, hard = resource.getrlimit(kind)
            limit = int(value)
            if hard != resource.RLIM_INFINITY:
                limit = min(limit, hard)
            resource.setrlimit(kind, (limit, hard))
        except (ValueError, OSError):
            pass

_apply_limits(sys.argv[1], sys.argv[2])
_path = sys.argv[3]
sys.argv = [_path]
with open(_path, encoding="utf-8") as _file:
    _code = compile(_file.read(), _path, "exec")
exec(_code, {"__name__": "__main__", "__file__": _path, "__builtins__": __builtins__})
"#;

/// Abstraction over code execution backends.
///
/// Expected failures (non-zero exit, timeout, rejected input) are `Ok` values;
/// `Err` means the host could not run the request at all.
pub trait CodeExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult>;
}

/// Executor that runs code in a confined Python subprocess.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Requested timeout, or the default, clamped to the configured maximum.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let timeout = requested.unwrap_or_else(|| self.config.timeout());
        timeout.min(self.config.max_timeout())
    }

    fn command(&self, scratch: &std::path::Path, script_path: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.config.python);
        cmd.arg("-I")
            .arg("-S")
            .arg("-B")
            .arg("-X")
            .arg("utf8")
            .arg("-c")
            .arg(BOOTSTRAP)
            .arg(limit_arg(self.config.cpu_limit_secs))
            .arg(limit_arg(
                self.config
                    .memory_limit_mb
                    .map(|mb| mb.saturating_mul(1024 * 1024)),
            ))
            .arg(script_path)
            .current_dir(scratch)
            .env_clear()
            .env("HOME", scratch)
            .env("TMPDIR", scratch);
        if let Some(path) = env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        for name in &self.config.pass_env {
            if let Some(value) = env::var_os(name) {
                cmd.env(name, value);
            }
        }
        cmd
    }

    fn run_script(&self, script: &str, timeout: Duration) -> Result<ExecutionResult> {
        let scratch = tempfile::Builder::new()
            .prefix("repair-sandbox-")
            .tempdir()
            .context("create sandbox scratch directory")?;
        let script_path = scratch.path().join(SCRIPT_FILE);
        fs::write(&script_path, script)
            .with_context(|| format!("write {}", script_path.display()))?;

        let cmd = self.command(scratch.path(), &script_path);
        let started = Instant::now();
        let output = run_isolated_with_timeout(
            cmd,
            None,
            timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.config.python.display()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        let result = if output.timed_out {
            warn!(elapsed_ms, "sandboxed execution timed out");
            let mut stderr = stderr;
            stderr.push_str(&format!(
                "TimeoutError: execution exceeded {:.1}s and was killed\n",
                timeout.as_secs_f64()
            ));
            ExecutionResult::timed_out(stdout, stderr)
        } else {
            ExecutionResult::completed(output.exit_code(), stdout, stderr)
        };
        debug!(
            exit_code = result.exit_code,
            ok = result.ok(),
            elapsed_ms,
            "sandboxed execution finished"
        );

        scratch
            .close()
            .context("remove sandbox scratch directory")?;
        Ok(result)
    }
}

impl CodeExecutor for PythonSandbox {
    #[instrument(skip_all, fields(code_bytes = request.code.len(), has_harness = request.harness.is_some()))]
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        if harness::normalize(&request.code).is_empty() {
            info!("rejecting empty code before execution");
            return Ok(ExecutionResult::rejected(
                "ValueError: empty code: there is nothing to execute\n",
            ));
        }

        let assembled = compose(&request.code, request.harness.as_deref());
        if self.config.syntax_precheck
            && let Err(issue) = check_syntax(assembled.script())
        {
            info!(line = issue.line, "rejecting code that does not parse");
            return Ok(ExecutionResult::rejected(format!(
                "{issue}\nThe script was not executed.\n"
            )));
        }

        let timeout = self.effective_timeout(request.timeout);
        self.run_script(assembled.script(), timeout)
    }
}

fn limit_arg(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unreachable_python() -> PythonSandbox {
        PythonSandbox::new(SandboxConfig {
            python: PathBuf::from("/nonexistent/python3"),
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn rejects_empty_code_without_spawning() {
        let result = unreachable_python()
            .execute(&ExecutionRequest::new("  \n\t\n", None))
            .expect("rejection is not a host failure");
        assert!(!result.ok());
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.contains("empty code"));
    }

    #[test]
    fn rejects_syntax_error_without_spawning() {
        let result = unreachable_python()
            .execute(&ExecutionRequest::new("def f(:", None))
            .expect("rejection is not a host failure");
        assert!(!result.ok());
        assert!(!result.timed_out);
        assert!(result.stderr.starts_with("SyntaxError"));
    }

    #[test]
    fn missing_interpreter_is_a_host_failure() {
        let err = unreachable_python()
            .execute(&ExecutionRequest::new("x = 1", None))
            .expect_err("spawn failure");
        assert!(format!("{err:#}").contains("/nonexistent/python3"));
    }

    #[test]
    fn timeout_is_clamped() {
        let sandbox = PythonSandbox::new(SandboxConfig {
            timeout_secs: 2.0,
            max_timeout_secs: 5.0,
            ..SandboxConfig::default()
        });
        assert_eq!(sandbox.effective_timeout(None), Duration::from_secs(2));
        assert_eq!(
            sandbox.effective_timeout(Some(Duration::from_secs(600))),
            Duration::from_secs(5)
        );
        assert_eq!(
            sandbox.effective_timeout(Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn limit_args_render_placeholders() {
        assert_eq!(limit_arg(None), "-");
        assert_eq!(limit_arg(Some(10)), "10");
    }
}
