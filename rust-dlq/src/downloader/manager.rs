//! Download manager: admission control and per-job supervision.
//!
//! The manager keeps at most `max_concurrent` jobs running, sourced from
//! the job store strictly in queue order. Each admitted job gets its own
//! supervisor task that drives the process runner through the retry
//! policy; when a supervisor reports done, its slot is freed and exactly
//! one next queued job is admitted.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::CommandBuilder;
use super::retry::RetryPolicy;
use super::runner::{self, AttemptOutcome};
use crate::config::AppConfig;
use crate::queue::{Job, JobId, JobStatus, JobStore, NewJob};
use crate::Result;

/// Output line buffer per running job.
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Bookkeeping for one admitted job.
///
/// The cancellation token is the process handle: cancelling it terminates
/// the current attempt (or skips the pending one) from any task, and
/// repeated cancels are no-ops.
struct ActiveJob {
    cancellation: CancellationToken,
}

/// Terminal outcome reported by a supervisor, exactly once per admission.
#[derive(Debug)]
enum SupervisionOutcome {
    Success,
    Failure(String),
    Cancelled,
}

/// Admission controller and supervisor host for download jobs.
pub struct DownloadManager {
    store: Arc<JobStore>,
    builder: Arc<dyn CommandBuilder>,
    config: RwLock<AppConfig>,
    /// Job id -> live supervisor handle. Exactly one entry per running job.
    active: DashMap<JobId, ActiveJob>,
    /// Serializes scan-and-admit so concurrent completions cannot over-admit.
    admission: Mutex<()>,
    /// Supervisor tasks. Taken (set to `None`) once shutdown begins, which
    /// also blocks any further admission.
    tasks: Mutex<Option<JoinSet<()>>>,
    shutting_down: AtomicBool,
}

impl DownloadManager {
    pub fn new(store: Arc<JobStore>, builder: Arc<dyn CommandBuilder>, config: AppConfig) -> Self {
        Self {
            store,
            builder,
            config: RwLock::new(config.validated()),
            active: DashMap::new(),
            admission: Mutex::new(()),
            tasks: Mutex::new(Some(JoinSet::new())),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Applies to future admissions and
    /// completions; running attempts keep the arguments they started with.
    pub fn update_config(&self, config: AppConfig) {
        *self.config.write() = config.validated();
    }

    /// Number of jobs with a live supervisor.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Add a job to the queue. Jobs without a format selector inherit the
    /// configured default.
    pub fn enqueue(&self, mut request: NewJob) -> Result<Job> {
        if request.format_selector.is_none() {
            request.format_selector = Some(self.config.read().default_format.clone());
        }
        self.store.insert(request)
    }

    /// Fill every free slot with queued jobs, in queue order.
    ///
    /// No-op when there is no queued work or no free slot.
    pub fn start(self: &Arc<Self>) {
        let _guard = self.admission.lock();
        let max_concurrent = self.config.read().max_concurrent;
        while self.active.len() < max_concurrent {
            let Some(job) = self.store.claim_next_queued() else {
                break;
            };
            self.admit(job);
        }
    }

    /// Admit at most one queued job, used after a slot frees up.
    fn admit_next(self: &Arc<Self>) {
        let _guard = self.admission.lock();
        let max_concurrent = self.config.read().max_concurrent;
        if self.active.len() < max_concurrent
            && let Some(job) = self.store.claim_next_queued()
        {
            self.admit(job);
        }
    }

    /// Spawn a supervisor for a job already claimed as running.
    fn admit(self: &Arc<Self>, job: Job) {
        let (program, args, policy) = {
            let config = self.config.read();
            (
                config.ytdlp_path.clone(),
                self.builder.build_args(&job, &config),
                config.retry_policy(),
            )
        };

        let cancellation = CancellationToken::new();
        self.active.insert(
            job.id,
            ActiveJob {
                cancellation: cancellation.clone(),
            },
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            // Shutdown raced the claim; hand the job back.
            self.active.remove(&job.id);
            let _ = self.store.update_status(job.id, JobStatus::Queued, None);
            return;
        };

        info!(job_id = %job.id, url = %job.url, "Admitting job");
        let manager = Arc::clone(self);
        join_set.spawn(async move {
            let outcome = run_supervised(&manager, &job, program, args, policy, cancellation).await;
            manager.finish(job.id, outcome);
        });
    }

    /// Complete one admission: set the terminal status, clear the
    /// association, then top the queue back up with one job.
    fn finish(self: &Arc<Self>, id: JobId, outcome: SupervisionOutcome) {
        self.active.remove(&id);
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);

        match outcome {
            SupervisionOutcome::Success => {
                if self.config.read().auto_remove_on_success {
                    if self.store.remove(id).is_ok() {
                        info!(job_id = %id, "Job completed and removed from queue");
                    }
                } else {
                    let _ = self.store.update_status(
                        id,
                        JobStatus::Completed,
                        Some("Download completed".to_string()),
                    );
                }
            }
            SupervisionOutcome::Failure(message) => {
                warn!(job_id = %id, "{message}");
                let _ = self
                    .store
                    .update_status(id, JobStatus::Failed, Some(message));
            }
            SupervisionOutcome::Cancelled => {
                if shutting_down {
                    // Shutdown demotion: the job resumes on next startup.
                    let _ = self.store.update_status(
                        id,
                        JobStatus::Queued,
                        Some("Interrupted by shutdown".to_string()),
                    );
                } else {
                    let _ = self.store.update_status(
                        id,
                        JobStatus::Cancelled,
                        Some("Cancelled by user".to_string()),
                    );
                }
            }
        }

        if !shutting_down {
            self.admit_next();
        }
    }

    /// Cancel a job.
    ///
    /// Running: the process is asked to terminate and the job is marked
    /// Cancelled; its slot frees once the supervisor reports done. Queued:
    /// marked Cancelled so it is never admitted. Terminal: no-op.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        if let Some(active) = self.active.get(&id) {
            info!(job_id = %id, "Cancelling running job");
            active.cancellation.cancel();
            drop(active);
            let _ = self.store.update_status(
                id,
                JobStatus::Cancelled,
                Some("Cancelled by user".to_string()),
            );
            return Ok(());
        }

        let job = self.store.get(id)?;
        if job.status == JobStatus::Queued {
            self.store.update_status(
                id,
                JobStatus::Cancelled,
                Some("Cancelled by user".to_string()),
            )?;
        }
        Ok(())
    }

    /// Remove a job from the queue, terminating its process first when it
    /// is running.
    pub fn remove(&self, id: JobId) -> Result<Job> {
        if let Some(active) = self.active.get(&id) {
            info!(job_id = %id, "Removing running job, terminating its process");
            active.cancellation.cancel();
        }
        self.store.remove(id)
    }

    /// Terminate all running work and demote it back to queued.
    ///
    /// After this returns every supervisor has reported done and no job is
    /// left in Running, so the caller can persist the store safely.
    pub async fn shutdown(&self) {
        info!("Shutting down download manager");
        self.shutting_down.store(true, Ordering::SeqCst);

        for entry in self.active.iter() {
            entry.value().cancellation.cancel();
        }

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        self.active.clear();
        // Safety net for supervisors that never reported.
        let demoted = self.store.reset_running_to_queued();
        if !demoted.is_empty() {
            warn!(count = demoted.len(), "Demoted unreported running jobs");
        }
        info!("Download manager stopped");
    }
}

/// Attempt loop for one admitted job.
///
/// Runs the process, retries failures after the fixed delay while budget
/// remains, and short-circuits to cancelled the moment the token fires,
/// including mid-wait.
async fn run_supervised(
    manager: &Arc<DownloadManager>,
    job: &Job,
    program: PathBuf,
    args: Vec<String>,
    policy: RetryPolicy,
    cancellation: CancellationToken,
) -> SupervisionOutcome {
    let store = Arc::clone(&manager.store);

    loop {
        if cancellation.is_cancelled() {
            return SupervisionOutcome::Cancelled;
        }

        let attempt = match store.begin_attempt(job.id) {
            Ok(attempt) => attempt,
            // Job was removed out from under us.
            Err(_) => return SupervisionOutcome::Cancelled,
        };
        debug!(job_id = %job.id, attempt, "Starting attempt");

        // Forward process output into the job's last_message as it arrives.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        let line_store = Arc::clone(&store);
        let job_id = job.id;
        let forwarder = tokio::spawn(async move {
            let mut last = None;
            while let Some(line) = line_rx.recv().await {
                let _ = line_store.set_message(job_id, line.clone());
                last = Some(line);
            }
            last
        });

        let result = runner::run_attempt(&program, &args, line_tx, cancellation.clone()).await;
        let last_line = forwarder.await.ok().flatten();

        let failure = match result {
            Ok(AttemptOutcome::Exited(0)) => return SupervisionOutcome::Success,
            Ok(AttemptOutcome::Cancelled) => return SupervisionOutcome::Cancelled,
            Ok(AttemptOutcome::Exited(code)) => match last_line {
                Some(line) => format!("exit code {code} ({line})"),
                None => format!("exit code {code}"),
            },
            Err(e) => e.to_string(),
        };

        if policy.should_retry(attempt) && !cancellation.is_cancelled() {
            let wait = policy.delay();
            let message = format!(
                "Failed; retrying in {wait:?} (attempt {attempt}/{})",
                policy.max_attempts()
            );
            warn!(job_id = %job.id, "{message}");
            let _ = store.set_message(job.id, message);

            tokio::select! {
                _ = cancellation.cancelled() => return SupervisionOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
            continue;
        }

        return SupervisionOutcome::Failure(format!(
            "Failed after {attempt} attempt(s): {failure}"
        ));
    }
}
