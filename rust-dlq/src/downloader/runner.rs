//! Process runner: one external process, one attempt.
//!
//! Spawns the download tool, forwards its stdout and stderr line-by-line
//! into a single sink as they arrive, and reports the exit outcome. The
//! runner holds no state beyond the invocation; termination is requested
//! through the cancellation token passed in by the caller (safe from any
//! task, idempotent after the first call).

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{Error, Result};

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The process was terminated through the cancellation token.
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Run one attempt of the external tool.
///
/// stdout and stderr are both piped and forwarded into `line_tx` in
/// arrival order, so progress and error text interleave chronologically
/// and reach the caller while the process is still running. A process
/// that cannot be spawned at all yields [`Error::Spawn`]; the caller
/// treats that exactly like a non-zero exit.
pub async fn run_attempt(
    program: &Path,
    args: &[String],
    line_tx: mpsc::Sender<String>,
    cancellation: CancellationToken,
) -> Result<AttemptOutcome> {
    let mut command = process_utils::tokio_command(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| Error::Spawn {
        program: program.display().to_string(),
        source: e,
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Other("Failed to capture child stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Other("Failed to capture child stderr".to_string()))?;

    let stdout_task = tokio::spawn(forward_lines(stdout, line_tx.clone()));
    let stderr_task = tokio::spawn(forward_lines(stderr, line_tx));

    let exit_rx = process_utils::spawn_exit_waiter(child, cancellation.clone());

    // Killing the child closes both pipes, so the readers always drain to
    // EOF on their own.
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    match exit_rx.await {
        Ok(Some(code)) => {
            debug!(program = %program.display(), code, "Attempt finished");
            Ok(AttemptOutcome::Exited(code))
        }
        Ok(None) => Ok(AttemptOutcome::Cancelled),
        Err(_) => {
            // Waiter task died without reporting; only plausible mid-shutdown.
            if cancellation.is_cancelled() {
                Ok(AttemptOutcome::Cancelled)
            } else {
                Ok(AttemptOutcome::Exited(-1))
            }
        }
    }
}

/// Forward one output stream to the sink, line by line.
async fn forward_lines(stream: impl AsyncRead + Unpin, tx: mpsc::Sender<String>) {
    let reader = BufReader::new(stream);
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    // Sink dropped; keep draining so the child never blocks
                    // on a full pipe.
                    continue;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error reading child output: {}", e);
                break;
            }
        }
    }
}
