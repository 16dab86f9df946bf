//! End-to-end supervision tests.
//!
//! These drive the real admission/retry/runner path against `sh` child
//! processes. A stub command builder turns each job's URL into the shell
//! script to run, so tests can express success, failure, and long-running
//! work directly.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rust_dlq::config::AppConfig;
use rust_dlq::downloader::{CommandBuilder, DownloadManager};
use rust_dlq::persist::{JsonFileAdapter, PersistenceAdapter};
use rust_dlq::queue::{Job, JobStatus, JobStore, NewJob};

/// Treats the job URL as a shell script: `sh -c <url>`.
struct ShellBuilder;

impl CommandBuilder for ShellBuilder {
    fn build_args(&self, job: &Job, _config: &AppConfig) -> Vec<String> {
        vec!["-c".to_string(), job.url.clone()]
    }
}

fn test_config(max_concurrent: usize, retry_attempts: u32) -> AppConfig {
    AppConfig {
        ytdlp_path: PathBuf::from("sh"),
        max_concurrent,
        retry_attempts,
        retry_delay_ms: 50,
        auto_remove_on_success: false,
        ..Default::default()
    }
}

fn setup(config: AppConfig) -> (Arc<JobStore>, Arc<DownloadManager>) {
    let store = Arc::new(JobStore::new());
    let manager = Arc::new(DownloadManager::new(
        Arc::clone(&store),
        Arc::new(ShellBuilder),
        config,
    ));
    (store, manager)
}

async fn wait_for(what: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

mod admission_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_bound_and_successor_admission() {
        let (store, manager) = setup(test_config(2, 0));
        let a = manager.enqueue(NewJob::new("sleep 0.2")).unwrap();
        let b = manager.enqueue(NewJob::new("sleep 0.6")).unwrap();
        let c = manager.enqueue(NewJob::new("sleep 0.2")).unwrap();

        manager.start();

        // A and B take the two slots; C stays queued.
        assert_eq!(store.get(a.id).unwrap().status, JobStatus::Running);
        assert_eq!(store.get(b.id).unwrap().status, JobStatus::Running);
        assert_eq!(store.get(c.id).unwrap().status, JobStatus::Queued);

        // Calling start again with no free slot changes nothing.
        manager.start();
        assert_eq!(manager.active_count(), 2);

        let store_watch = Arc::clone(&store);
        wait_for("all jobs to complete", || {
            assert!(store_watch.count_with_status(JobStatus::Running) <= 2);
            store_watch.count_with_status(JobStatus::Completed) == 3
        })
        .await;
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_late_enqueue_is_admitted_on_completion() {
        let (store, manager) = setup(test_config(1, 0));
        manager.enqueue(NewJob::new("sleep 0.2")).unwrap();
        manager.start();

        // Enqueued after start(); no extra start() call follows.
        let late = manager.enqueue(NewJob::new("true")).unwrap();

        let store_watch = Arc::clone(&store);
        wait_for("late job to complete", move || {
            store_watch.get(late.id).unwrap().status == JobStatus::Completed
        })
        .await;
    }

    #[tokio::test]
    async fn test_reorder_changes_admission_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");

        let (store, manager) = setup(test_config(1, 0));
        let a = manager.enqueue(NewJob::new("sleep 0.2")).unwrap();
        let c = manager
            .enqueue(NewJob::new(format!("echo c >> {}", log.display())))
            .unwrap();
        let d = manager
            .enqueue(NewJob::new(format!("echo d >> {}", log.display())))
            .unwrap();

        manager.start();
        assert_eq!(store.get(a.id).unwrap().status, JobStatus::Running);

        // Promote D while A runs; reordering never disturbs running work.
        store
            .move_job(d.id, rust_dlq::queue::MoveTo::Head)
            .unwrap();
        assert_eq!(store.get(a.id).unwrap().status, JobStatus::Running);

        let store_watch = Arc::clone(&store);
        wait_for("queue to drain", move || {
            store_watch.count_with_status(JobStatus::Completed) == 3
        })
        .await;

        let order = std::fs::read_to_string(&log).unwrap();
        assert_eq!(order, "d\nc\n");
        // Silence unused warning; C's id is only needed for enqueue order.
        let _ = c;
    }

    #[tokio::test]
    async fn test_auto_remove_on_success() {
        let mut config = test_config(1, 0);
        config.auto_remove_on_success = true;
        let (store, manager) = setup(config);

        manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        let store_watch = Arc::clone(&store);
        wait_for("job to be removed", move || store_watch.is_empty()).await;
        assert_eq!(manager.active_count(), 0);
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_consumes_exact_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("attempts.log");

        let (store, manager) = setup(test_config(1, 2));
        let job = manager
            .enqueue(NewJob::new(format!("echo x >> {}; exit 1", log.display())))
            .unwrap();
        manager.start();

        let store_watch = Arc::clone(&store);
        wait_for("job to fail", move || {
            store_watch.get(job.id).unwrap().status == JobStatus::Failed
        })
        .await;

        let failed = store.get(job.id).unwrap();
        // retry_attempts=2 means exactly three process invocations.
        assert_eq!(failed.attempt_count, 3);
        let invocations = std::fs::read_to_string(&log).unwrap();
        assert_eq!(invocations.lines().count(), 3);
        assert!(failed.last_message.unwrap().contains("Failed after 3"));
    }

    #[tokio::test]
    async fn test_success_needs_single_attempt() {
        let (store, manager) = setup(test_config(1, 3));
        let job = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        let store_watch = Arc::clone(&store);
        wait_for("job to complete", move || {
            store_watch.get(job.id).unwrap().status == JobStatus::Completed
        })
        .await;
        assert_eq!(store.get(job.id).unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_spawn_error_is_retried_like_failure() {
        let mut config = test_config(1, 1);
        config.ytdlp_path = PathBuf::from("/nonexistent/not-a-real-binary");
        let (store, manager) = setup(config);

        let job = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        let store_watch = Arc::clone(&store);
        wait_for("job to fail", move || {
            store_watch.get(job.id).unwrap().status == JobStatus::Failed
        })
        .await;

        let failed = store.get(job.id).unwrap();
        assert_eq!(failed.attempt_count, 2);
        assert!(failed.last_message.unwrap().contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_jobs() {
        let (store, manager) = setup(test_config(1, 0));
        let bad = manager.enqueue(NewJob::new("exit 1")).unwrap();
        let good = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        let store_watch = Arc::clone(&store);
        wait_for("good job to complete", move || {
            store_watch.get(good.id).unwrap().status == JobStatus::Completed
        })
        .await;
        assert_eq!(store.get(bad.id).unwrap().status, JobStatus::Failed);
    }
}

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_running_job_frees_slot() {
        let (store, manager) = setup(test_config(1, 5));
        let long = manager.enqueue(NewJob::new("sleep 30")).unwrap();
        let next = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();
        assert_eq!(store.get(long.id).unwrap().status, JobStatus::Running);

        // Let the first attempt actually spawn before pulling the plug.
        let store_watch = Arc::clone(&store);
        wait_for("attempt to start", move || {
            store_watch.get(long.id).unwrap().attempt_count == 1
        })
        .await;

        manager.cancel(long.id).unwrap();

        // The freed slot admits the next queued job without a new start().
        let store_watch = Arc::clone(&store);
        wait_for("next job to complete", move || {
            store_watch.get(next.id).unwrap().status == JobStatus::Completed
        })
        .await;

        // Cancelled, never Failed, and no retry was attempted.
        let cancelled = store.get(long.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.attempt_count, 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_retry_wait() {
        let mut config = test_config(1, 5);
        config.retry_delay_ms = 10_000;
        let (store, manager) = setup(config);

        let job = manager.enqueue(NewJob::new("exit 1")).unwrap();
        manager.start();

        // Wait until the first attempt failed and the supervisor sits in
        // its backoff wait.
        let store_watch = Arc::clone(&store);
        wait_for("retry wait", move || {
            store_watch
                .get(job.id)
                .unwrap()
                .last_message
                .is_some_and(|m| m.contains("retrying"))
        })
        .await;

        manager.cancel(job.id).unwrap();

        let store_watch = Arc::clone(&store);
        wait_for("cancellation", move || {
            store_watch.get(job.id).unwrap().status == JobStatus::Cancelled
        })
        .await;
        assert_eq!(store.get(job.id).unwrap().attempt_count, 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_running_job_terminates_process() {
        let (store, manager) = setup(test_config(1, 0));
        let long = manager.enqueue(NewJob::new("sleep 30")).unwrap();
        let next = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        let removed = manager.remove(long.id).unwrap();
        assert_eq!(removed.id, long.id);
        assert!(store.get(long.id).is_err());

        let store_watch = Arc::clone(&store);
        wait_for("next job to complete", move || {
            store_watch.get(next.id).unwrap().status == JobStatus::Completed
        })
        .await;
    }

    #[tokio::test]
    async fn test_remove_queued_job_has_no_side_effects() {
        let (store, manager) = setup(test_config(1, 0));
        let running = manager.enqueue(NewJob::new("sleep 0.3")).unwrap();
        let queued = manager.enqueue(NewJob::new("true")).unwrap();
        let kept = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        manager.remove(queued.id).unwrap();
        assert_eq!(store.get(running.id).unwrap().status, JobStatus::Running);

        let store_watch = Arc::clone(&store);
        wait_for("remaining jobs to complete", move || {
            store_watch.get(kept.id).unwrap().status == JobStatus::Completed
                && store_watch.get(running.id).unwrap().status == JobStatus::Completed
        })
        .await;
        assert_eq!(store.len(), 2);
    }
}

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_demotes_running_and_persists_as_queued() {
        let (store, manager) = setup(test_config(1, 0));
        let running = manager.enqueue(NewJob::new("sleep 30")).unwrap();
        let queued = manager
            .enqueue(NewJob::new("true").with_display_name("second"))
            .unwrap();
        manager.start();
        assert_eq!(store.get(running.id).unwrap().status, JobStatus::Running);

        let store_watch = Arc::clone(&store);
        wait_for("attempt to start", move || {
            store_watch.get(running.id).unwrap().attempt_count == 1
        })
        .await;

        manager.shutdown().await;

        // Running work is handed back to the queue, not cancelled.
        assert_eq!(store.get(running.id).unwrap().status, JobStatus::Queued);
        assert_eq!(manager.active_count(), 0);
        // Shutdown leaves the interruption on record.
        assert_eq!(store.get(running.id).unwrap().attempt_count, 1);

        // Persist and restore: order and fields survive, nothing is Running.
        let dir = tempfile::tempdir().unwrap();
        let adapter = JsonFileAdapter::new(dir.path());
        adapter.save_jobs(&store.snapshots()).await.unwrap();

        let restored = JobStore::new();
        restored.restore(adapter.load_jobs().await.unwrap());
        let jobs = restored.list();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].url, "sleep 30");
        assert_eq!(jobs[0].status, JobStatus::Queued);
        assert_eq!(jobs[0].attempt_count, 0);
        assert_eq!(jobs[1].display_name.as_deref(), Some("second"));
        let _ = queued;
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_rejected() {
        let (store, manager) = setup(test_config(1, 0));
        manager.shutdown().await;

        let job = manager.enqueue(NewJob::new("true")).unwrap();
        manager.start();

        // The claim is reverted; the job stays queued and no task runs.
        assert_eq!(manager.active_count(), 0);
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Queued);
    }
}
