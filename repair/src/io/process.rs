//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::NO_EXIT_CODE;

/// How long to wait for a pending stdin write after the child has exited.
const STDIN_GRACE: Duration = Duration::from_millis(200);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// Whether all of the provided stdin reached the pipe. `true` when no input was given.
    pub stdin_written: bool,
}

impl CommandOutput {
    /// Exit code, or [`NO_EXIT_CODE`] when the child was killed or died from a signal.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            return NO_EXIT_CODE;
        }
        self.status.code().unwrap_or(NO_EXIT_CODE)
    }

    /// Lossy UTF-8 stdout with a truncation notice appended when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        decode_stream(&self.stdout, "stdout", self.stdout_truncated)
    }

    /// Lossy UTF-8 stderr with a truncation notice appended when bytes were dropped.
    pub fn stderr_text(&self) -> String {
        decode_stream(&self.stderr, "stderr", self.stderr_truncated)
    }
}

fn decode_stream(bytes: &[u8], stream: &str, truncated: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[{stream} truncated {truncated} bytes]\n"));
    }
    text
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// The child leads its own process group and the whole group is killed on timeout, so
/// grandchildren holding the pipes cannot outlive it. Input is written and output is read on
/// separate threads, so the timeout holds even when the child never reads its stdin.
/// `output_limit_bytes` bounds the stdout/stderr kept in memory (bytes beyond this are
/// discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_isolated_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let stdin_done = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let result = child_stdin.write_all(&input);
                drop(child_stdin);
                let _ = tx.send(result);
            });
            Some(rx)
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            kill_group(child.id());
            if let Err(e) = child.kill() {
                debug!(err = %e, "kill after timeout");
            }
            child.wait().context("wait command after kill")?
        }
    };

    // The writer is never joined: once the group is gone its pipe breaks,
    // and a write still pending after the grace period means unread input.
    let stdin_written = match stdin_done {
        None => true,
        Some(rx) => match rx.recv_timeout(STDIN_GRACE) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(err = %e, "failed to write child stdin");
                false
            }
            Err(_) => {
                warn!("child stdin still pending after exit");
                false
            }
        },
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, stdin_written, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        stdin_written,
    })
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let result = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        warn!(err = %e, pid, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
