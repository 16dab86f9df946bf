//! Helpers for spawning and supervising external tool processes.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Spawn a task that waits for a child process to exit and reports the
/// result through a oneshot channel.
///
/// If the cancellation token fires first, the child is killed and `None`
/// is sent. A child that dies to a signal (no exit code) is reported as
/// `Some(-1)` so callers can treat it as an ordinary failure.
///
/// # Returns
/// A receiver that yields:
/// * `Some(exit_code)` - the process exited on its own
/// * `None` - the process was cancelled
#[cfg(feature = "tokio")]
pub fn spawn_exit_waiter(
    mut child: tokio::process::Child,
    cancellation_token: tokio_util::sync::CancellationToken,
) -> tokio::sync::oneshot::Receiver<Option<i32>> {
    use tracing::{error, warn};

    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = cancellation_token.cancelled() => {
                let _ = child.kill().await;
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => {
                        let code = exit_status.code();
                        if let Some(c) = code
                            && c != 0
                        {
                            warn!("Process exited with code: {}", c);
                        }
                        // No code means the child was signal-killed.
                        Some(code.unwrap_or(-1))
                    }
                    Err(e) => {
                        error!("Error waiting for process: {}", e);
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}
