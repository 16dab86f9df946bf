//! Application configuration.
//!
//! Mirrors the fields of the on-disk `config.json`. Everything the queue
//! core does not interpret itself (`concurrent_fragments`, `output_dir`,
//! `ytdlp_path`, `default_format`) is relayed unmodified to the command
//! builder.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::downloader::retry::RetryPolicy;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the yt-dlp binary.
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,
    /// Directory downloads are written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Maximum number of concurrently running jobs. Always >= 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries per job after the first failed attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Remove a job from the queue once it completes successfully.
    #[serde(default = "default_true")]
    pub auto_remove_on_success: bool,
    /// Fragment parallelism passed through to yt-dlp.
    #[serde(default = "default_concurrent_fragments")]
    pub concurrent_fragments: u32,
    /// Format selector applied to new jobs that do not set their own.
    #[serde(default = "default_format")]
    pub default_format: String,
}

fn default_ytdlp_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("yt-dlp.exe")
    } else {
        PathBuf::from("yt-dlp")
    }
}

fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_max_concurrent() -> usize {
    1
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_concurrent_fragments() -> u32 {
    5
}

fn default_format() -> String {
    "best".to_string()
}

impl AppConfig {
    /// Clamp out-of-range values instead of rejecting the whole config.
    ///
    /// A zero `max_concurrent` would stall the queue forever, so it is
    /// raised to 1 with a warning.
    pub fn validated(mut self) -> Self {
        if self.max_concurrent == 0 {
            warn!("max_concurrent of 0 is not allowed, clamping to 1");
            self.max_concurrent = 1;
        }
        self
    }

    /// The retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            delay_ms: self.retry_delay_ms,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            output_dir: default_output_dir(),
            max_concurrent: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            auto_remove_on_success: default_true(),
            concurrent_fragments: default_concurrent_fragments(),
            default_format: default_format(),
        }
    }
}
