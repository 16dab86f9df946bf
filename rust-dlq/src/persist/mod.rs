//! Queue and configuration persistence.
//!
//! The queue survives restarts as two small JSON files (`config.json`,
//! `queue.json`) in a per-user data directory. Load failures are reported
//! to the caller, which recovers with defaults or an empty queue; they
//! never take the core down.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::queue::job::{Job, JobId, JobStatus};
use crate::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const QUEUE_FILE: &str = "queue.json";

/// Persisted form of one job.
///
/// `attempt_count` and `last_message` are deliberately absent: no process
/// survives a restart, so attempts restart at zero and stale progress
/// lines are meaningless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub url: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_selector")]
    pub format_selector: String,
    pub status: JobStatus,
}

fn default_selector() -> String {
    "best".to_string()
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            url: job.url.clone(),
            display_name: job.display_name.clone(),
            format_selector: job.format_selector.clone(),
            status: job.status,
        }
    }
}

impl JobSnapshot {
    /// Rehydrate a job with a fresh id. A snapshot taken while the job was
    /// running comes back queued.
    pub fn into_job(self) -> Job {
        let status = match self.status {
            JobStatus::Running => JobStatus::Queued,
            other => other,
        };
        Job {
            id: JobId::new(),
            url: self.url,
            display_name: self.display_name,
            format_selector: self.format_selector,
            status,
            attempt_count: 0,
            last_message: None,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Loads and saves queue state and configuration across process lifetime.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load_config(&self) -> Result<AppConfig>;
    async fn save_config(&self, config: &AppConfig) -> Result<()>;
    async fn load_jobs(&self) -> Result<Vec<JobSnapshot>>;
    async fn save_jobs(&self, jobs: &[JobSnapshot]) -> Result<()>;
}

/// JSON-file adapter rooted in a data directory.
pub struct JsonFileAdapter {
    dir: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Per-user default data directory: `%LOCALAPPDATA%\rust-dlq` on
    /// Windows, `~/.rust-dlq` elsewhere.
    pub fn default_dir() -> PathBuf {
        if cfg!(windows) {
            if let Some(local) = std::env::var_os("LOCALAPPDATA") {
                return PathBuf::from(local).join("rust-dlq");
            }
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".rust-dlq"))
            .unwrap_or_else(|| PathBuf::from(".rust-dlq"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    fn queue_path(&self) -> PathBuf {
        self.dir.join(QUEUE_FILE)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "Persisted state");
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFileAdapter {
    async fn load_config(&self) -> Result<AppConfig> {
        let path = self.config_path();
        if !path.exists() {
            // First run.
            return Ok(AppConfig::default());
        }
        let json = tokio::fs::read_to_string(&path).await?;
        let config: AppConfig = serde_json::from_str(&json)
            .map_err(|e| Error::persistence(format!("invalid {}: {e}", path.display())))?;
        Ok(config.validated())
    }

    async fn save_config(&self, config: &AppConfig) -> Result<()> {
        self.write_json(&self.config_path(), config).await
    }

    async fn load_jobs(&self) -> Result<Vec<JobSnapshot>> {
        let path = self.queue_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&json)
            .map_err(|e| Error::persistence(format!("invalid {}: {e}", path.display())))
    }

    async fn save_jobs(&self, jobs: &[JobSnapshot]) -> Result<()> {
        self.write_json(&self.queue_path(), &jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobStore, NewJob};
    use std::sync::Arc;

    fn adapter() -> (tempfile::TempDir, JsonFileAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = JsonFileAdapter::new(dir.path());
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_missing_files_load_as_defaults() {
        let (_dir, adapter) = adapter();
        assert_eq!(adapter.load_config().await.unwrap(), AppConfig::default());
        assert!(adapter.load_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let (_dir, adapter) = adapter();
        let config = AppConfig {
            max_concurrent: 3,
            retry_attempts: 1,
            ..Default::default()
        };
        adapter.save_config(&config).await.unwrap();
        assert_eq!(adapter.load_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_queue_round_trip_preserves_order_and_fields() {
        let (_dir, adapter) = adapter();
        let store = Arc::new(JobStore::new());
        store
            .insert(NewJob::new("https://a").with_display_name("first"))
            .unwrap();
        store
            .insert(NewJob::new("https://b").with_format_selector("720p"))
            .unwrap();

        adapter.save_jobs(&store.snapshots()).await.unwrap();
        let loaded = adapter.load_jobs().await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].url, "https://a");
        assert_eq!(loaded[0].display_name.as_deref(), Some("first"));
        assert_eq!(loaded[1].url, "https://b");
        assert_eq!(loaded[1].format_selector, "720p");
    }

    #[tokio::test]
    async fn test_running_snapshot_restores_as_queued() {
        let snapshot = JobSnapshot {
            url: "https://a".to_string(),
            display_name: None,
            format_selector: "best".to_string(),
            status: JobStatus::Running,
        };
        let job = snapshot.into_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_terminal_snapshot_restores_verbatim() {
        let snapshot = JobSnapshot {
            url: "https://a".to_string(),
            display_name: None,
            format_selector: "best".to_string(),
            status: JobStatus::Failed,
        };
        assert_eq!(snapshot.into_job().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let (dir, adapter) = adapter();
        tokio::fs::write(dir.path().join(QUEUE_FILE), "not json")
            .await
            .unwrap();
        assert!(matches!(
            adapter.load_jobs().await,
            Err(Error::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_clamped_on_load() {
        let (dir, adapter) = adapter();
        tokio::fs::write(dir.path().join(CONFIG_FILE), r#"{"max_concurrent": 0}"#)
            .await
            .unwrap();
        assert_eq!(adapter.load_config().await.unwrap().max_concurrent, 1);
    }
}
