//! Download supervision: admission control, retries, and process running.

pub mod command;
pub mod manager;
pub mod retry;
pub mod runner;

pub use command::{CommandBuilder, YtDlpCommandBuilder};
pub use manager::DownloadManager;
pub use retry::RetryPolicy;
pub use runner::{AttemptOutcome, run_attempt};
