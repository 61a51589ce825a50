//! Sandbox tests against a real `python3`.
//!
//! Each test returns early when no interpreter is installed.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use repair::core::types::{ExecutionRequest, NO_EXIT_CODE};
use repair::io::config::SandboxConfig;
use repair::io::sandbox::{CodeExecutor, PythonSandbox};
use repair::test_support::python_available;

fn sandbox() -> Option<PythonSandbox> {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return None;
    }
    Some(PythonSandbox::new(SandboxConfig::default()))
}

#[test]
fn failing_then_fixed_add() {
    let Some(sandbox) = sandbox() else { return };
    let harness = Some("assert add(2,3)==5".to_string());

    let broken = sandbox
        .execute(&ExecutionRequest::new("def add(a,b): return a-b", harness.clone()))
        .expect("execute");
    assert!(!broken.ok());
    assert_ne!(broken.exit_code, 0);
    assert!(broken.stderr.contains("AssertionError"), "{}", broken.stderr);

    let fixed = sandbox
        .execute(&ExecutionRequest::new("def add(a,b): return a+b", harness))
        .expect("execute");
    assert!(fixed.ok(), "{}", fixed.stderr);
    assert_eq!(fixed.exit_code, 0);
}

#[test]
fn infinite_loop_times_out() {
    let Some(sandbox) = sandbox() else { return };
    let started = Instant::now();
    let result = sandbox
        .execute(
            &ExecutionRequest::new("while True:\n    pass", None)
                .with_timeout(Duration::from_secs(1)),
        )
        .expect("execute");
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert!(!result.ok());
    assert_eq!(result.exit_code, NO_EXIT_CODE);
    assert!(result.stderr.contains("TimeoutError"));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[test]
fn runs_inside_removed_scratch_directory() {
    let Some(sandbox) = sandbox() else { return };
    let result = sandbox
        .execute(&ExecutionRequest::new(
            "import os\nprint(os.getcwd())\nprint(os.environ.get('HOME'))",
            None,
        ))
        .expect("execute");
    assert!(result.ok(), "{}", result.stderr);

    let mut lines = result.stdout.lines();
    let cwd = PathBuf::from(lines.next().expect("cwd line"));
    let home = lines.next().expect("home line");
    assert!(
        cwd.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("repair-sandbox-"))
    );
    assert_eq!(PathBuf::from(home), cwd);
    assert!(!cwd.exists(), "scratch directory should be removed");
}

#[test]
fn host_environment_is_not_inherited() {
    let Some(sandbox) = sandbox() else { return };
    let Some((name, _)) = std::env::vars().find(|(name, _)| name == "CARGO_PKG_NAME") else {
        return;
    };
    let code = format!("import os\nassert '{name}' not in os.environ");
    let result = sandbox
        .execute(&ExecutionRequest::new(code, None))
        .expect("execute");
    assert!(result.ok(), "{}", result.stderr);
}

#[test]
fn main_block_in_code_is_used_as_is() {
    let Some(sandbox) = sandbox() else { return };
    let result = sandbox
        .execute(&ExecutionRequest::new(
            "def f():\n    return 2\n\nif __name__ == \"__main__\":\n    print(f())",
            None,
        ))
        .expect("execute");
    assert!(result.ok(), "{}", result.stderr);
    assert_eq!(result.stdout, "2\n");
}

#[test]
fn large_output_is_truncated_with_notice() {
    let Some(sandbox) = sandbox() else { return };
    let sandbox = PythonSandbox::new(SandboxConfig {
        output_limit_bytes: 1024,
        ..sandbox.config().clone()
    });
    let result = sandbox
        .execute(&ExecutionRequest::new("print('x' * 10000)", None))
        .expect("execute");
    assert!(result.ok(), "{}", result.stderr);
    assert!(result.stdout.len() < 2048);
    assert!(result.stdout.contains("[stdout truncated"));
}

#[test]
fn syntax_error_fails_fast() {
    let Some(sandbox) = sandbox() else { return };
    let started = Instant::now();
    let result = sandbox
        .execute(&ExecutionRequest::new("def f(:", None))
        .expect("execute");
    assert!(!result.ok());
    assert!(result.stderr.contains("SyntaxError"));
    assert!(started.elapsed() < Duration::from_millis(500));
}
