//! Subprocess runner: execute a code block and stream its output.
//!
//! The interpreter gets the code on stdin. Stdout and stderr are read
//! concurrently and forwarded line by line; the child is killed when the
//! receiver goes away or the timeout elapses.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use codeloop_core::computer::{OutputLine, OutputStream};
use codeloop_core::error::ExecutionError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::language::Language;

/// One subprocess invocation.
pub struct RunRequest<'a> {
    pub language: &'a Language,
    pub code: String,
    /// Characters kept per output line
    pub max_output: usize,
    pub timeout: Duration,
    /// Extra environment for the child
    pub env: Vec<(String, PathBuf)>,
}

/// Keep at most `max` characters of `line`, marking the cut.
pub fn truncate_line(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let kept: String = line.chars().take(max).collect();
    format!("{kept}... (output truncated)")
}

/// Spawn the interpreter and return a stream of its output.
pub async fn spawn(request: RunRequest<'_>) -> Result<OutputStream, ExecutionError> {
    let language = request.language;
    debug!(language = %language.name, command = %language.command, "Spawning runtime");

    let mut command = Command::new(&language.command);
    command
        .args(&language.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &request.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| ExecutionError::SpawnFailed {
        language: language.name.clone(),
        reason: e.to_string(),
    })?;

    let (Some(mut stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(ExecutionError::SpawnFailed {
            language: language.name.clone(),
            reason: "child stdio was not captured".into(),
        });
    };

    // Feed the code from its own task so a chatty child cannot block us.
    let code = request.code;
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(code.as_bytes()).await {
            warn!(error = %e, "Failed to write code to runtime stdin");
        }
        let _ = stdin.shutdown().await;
    });

    let (tx, rx) = mpsc::channel(64);
    let max_output = request.max_output;
    let timeout = request.timeout;

    tokio::spawn(async move {
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        while !(out_done && err_done) {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("Output receiver dropped, killing runtime");
                    let _ = child.kill().await;
                    return;
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    let _ = tx
                        .send(Err(ExecutionError::Timeout { timeout_secs: timeout.as_secs() }))
                        .await;
                    return;
                }
                line = out.next_line(), if !out_done => match line {
                    Ok(None) => { out_done = true; None }
                    other => Some(other),
                },
                line = err.next_line(), if !err_done => match line {
                    Ok(None) => { err_done = true; None }
                    other => Some(other),
                },
            };

            match next {
                None => {}
                Some(Ok(Some(line))) => {
                    let line = truncate_line(&line, max_output);
                    if tx.send(Ok(OutputLine::output(format!("{line}\n")))).await.is_err() {
                        let _ = child.kill().await;
                        return;
                    }
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => {
                    let _ = tx.send(Err(ExecutionError::Io(e))).await;
                    let _ = child.kill().await;
                    return;
                }
            }
        }

        match child.wait().await {
            Ok(status) if !status.success() => {
                let code = status.code().unwrap_or(-1);
                warn!(exit_code = code, "Runtime exited with failure");
                let _ = tx
                    .send(Ok(OutputLine::output(format!("[exit code: {code}]\n"))))
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(Err(ExecutionError::Io(e))).await;
            }
        }
    });

    Ok(rx)
}
