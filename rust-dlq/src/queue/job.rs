//! Job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque stable job identifier. Assigned at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is queued and waiting for a free slot.
    Queued,
    /// Job has a live external process attached.
    Running,
    /// Job finished successfully.
    Completed,
    /// Job failed after exhausting retries.
    Failed,
    /// Job was stopped by the user; never retried.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Check if this is a terminal status (no further automatic transition).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One user-submitted unit of work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Source URL. Immutable while the job is running.
    pub url: String,
    /// Output name override. When absent, yt-dlp derives the name from the
    /// source title.
    pub display_name: Option<String>,
    /// Quality/format selector, passed through to the command builder.
    pub format_selector: String,
    pub status: JobStatus,
    /// Attempts consumed for the current submission.
    pub attempt_count: u32,
    /// Most recent progress or error line. Observability only.
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a new job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub url: String,
    pub display_name: Option<String>,
    pub format_selector: Option<String>,
}

impl NewJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_format_selector(mut self, selector: impl Into<String>) -> Self {
        self.format_selector = Some(selector.into());
        self
    }
}

impl Job {
    /// Build a fresh queued job from a request.
    pub(crate) fn from_request(request: NewJob, default_format: &str) -> Self {
        Self {
            id: JobId::new(),
            url: request.url,
            display_name: request.display_name.filter(|n| !n.trim().is_empty()),
            format_selector: request
                .format_selector
                .unwrap_or_else(|| default_format.to_string()),
            status: JobStatus::Queued,
            attempt_count: 0,
            last_message: None,
            created_at: Utc::now(),
        }
    }
}
