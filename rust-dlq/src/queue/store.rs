//! Ordered job store.
//!
//! The single source of truth the presentation layer observes. Jobs are
//! kept in insertion order (which is admission priority order) with O(1)
//! lookup by id. All mutations go through one lock and broadcast a
//! [`QueueEvent`] after the lock is released.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::events::{QueueEvent, QueueEventSender};
use super::job::{Job, JobId, JobStatus, NewJob};
use crate::persist::JobSnapshot;
use crate::{Error, Result};

/// Target position for a reorder operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTo {
    /// One position earlier.
    Up,
    /// One position later.
    Down,
    /// Front of the queue.
    Head,
    /// Back of the queue.
    Tail,
}

#[derive(Default)]
struct StoreInner {
    /// Queue order. Admission scans this front to back.
    order: Vec<JobId>,
    jobs: HashMap<JobId, Job>,
}

impl StoreInner {
    fn position(&self, id: JobId) -> Option<usize> {
        self.order.iter().position(|j| *j == id)
    }
}

/// Ordered collection of jobs.
pub struct JobStore {
    inner: RwLock<StoreInner>,
    events: QueueEventSender,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            events: QueueEventSender::new(),
        }
    }

    /// Subscribe to queue change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Insert a new job at the tail of the queue.
    pub fn insert(&self, request: NewJob) -> Result<Job> {
        if request.url.trim().is_empty() {
            return Err(Error::validation("job URL must not be empty"));
        }

        let job = Job::from_request(request, "best");
        {
            let mut inner = self.inner.write();
            inner.order.push(job.id);
            inner.jobs.insert(job.id, job.clone());
        }
        debug!(job_id = %job.id, url = %job.url, "Job enqueued");
        self.events.emit(QueueEvent::JobAdded(job.clone()));
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        self.inner
            .read()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id.to_string()))
    }

    /// All jobs in queue order.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner
            .read()
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Whether any job is still queued or running.
    pub fn has_pending_work(&self) -> bool {
        self.inner
            .read()
            .jobs
            .values()
            .any(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
    }

    /// Remove a job and return it.
    pub fn remove(&self, id: JobId) -> Result<Job> {
        let removed = {
            let mut inner = self.inner.write();
            let Some(pos) = inner.position(id) else {
                return Err(Error::not_found("job", id.to_string()));
            };
            inner.order.remove(pos);
            inner.jobs.remove(&id).expect("order and map stay in sync")
        };
        self.events.emit(QueueEvent::JobRemoved(id));
        Ok(removed)
    }

    /// Reorder a job. Legal for running jobs; order only matters for
    /// future admission scans.
    pub fn move_job(&self, id: JobId, to: MoveTo) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let Some(pos) = inner.position(id) else {
                return Err(Error::not_found("job", id.to_string()));
            };
            let last = inner.order.len() - 1;
            match to {
                MoveTo::Up if pos > 0 => inner.order.swap(pos, pos - 1),
                MoveTo::Down if pos < last => inner.order.swap(pos, pos + 1),
                MoveTo::Head if pos > 0 => {
                    inner.order.remove(pos);
                    inner.order.insert(0, id);
                }
                MoveTo::Tail if pos < last => {
                    inner.order.remove(pos);
                    inner.order.push(id);
                }
                // Already at the requested boundary.
                _ => return Ok(()),
            }
        }
        self.events.emit(QueueEvent::Reordered);
        Ok(())
    }

    /// Set a job's status, optionally with a message.
    pub fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
    ) -> Result<Job> {
        let job = {
            let mut inner = self.inner.write();
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id.to_string()))?;
            job.status = status;
            if let Some(message) = message {
                job.last_message = Some(message);
            }
            job.clone()
        };
        self.events.emit(QueueEvent::JobUpdated(job.clone()));
        Ok(job)
    }

    /// Record the latest output line for a job.
    pub fn set_message(&self, id: JobId, message: impl Into<String>) -> Result<()> {
        let job = {
            let mut inner = self.inner.write();
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id.to_string()))?;
            job.last_message = Some(message.into());
            job.clone()
        };
        self.events.emit(QueueEvent::JobUpdated(job));
        Ok(())
    }

    /// Change a job's URL. Rejected while the job is running.
    pub fn update_url(&self, id: JobId, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::validation("job URL must not be empty"));
        }
        let job = {
            let mut inner = self.inner.write();
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id.to_string()))?;
            if job.status == JobStatus::Running {
                return Err(Error::InvalidStateTransition {
                    from: "RUNNING".to_string(),
                    to: "url change".to_string(),
                });
            }
            job.url = url;
            job.clone()
        };
        self.events.emit(QueueEvent::JobUpdated(job));
        Ok(())
    }

    /// Increment a job's attempt count and return the new value.
    pub fn begin_attempt(&self, id: JobId) -> Result<u32> {
        let (job, attempt) = {
            let mut inner = self.inner.write();
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id.to_string()))?;
            job.attempt_count += 1;
            (job.clone(), job.attempt_count)
        };
        self.events.emit(QueueEvent::JobUpdated(job));
        Ok(attempt)
    }

    /// Atomically mark the first queued job as running and return it.
    ///
    /// This is the admission primitive: find-and-transition happens under
    /// one write lock so two concurrent scans can never claim the same job.
    pub fn claim_next_queued(&self) -> Option<Job> {
        let job = {
            let mut inner = self.inner.write();
            let id = inner
                .order
                .iter()
                .copied()
                .find(|id| inner.jobs.get(id).is_some_and(|j| j.status == JobStatus::Queued))?;
            let job = inner.jobs.get_mut(&id).expect("order and map stay in sync");
            job.status = JobStatus::Running;
            job.attempt_count = 0;
            job.clone()
        };
        self.events.emit(QueueEvent::JobUpdated(job.clone()));
        Some(job)
    }

    /// Demote every running job back to queued.
    ///
    /// Attempt counts are left untouched; no process survives the shutdown
    /// this precedes.
    pub fn reset_running_to_queued(&self) -> Vec<JobId> {
        let demoted: Vec<Job> = {
            let mut inner = self.inner.write();
            inner
                .jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Running)
                .map(|j| {
                    j.status = JobStatus::Queued;
                    j.clone()
                })
                .collect()
        };
        for job in &demoted {
            self.events.emit(QueueEvent::JobUpdated(job.clone()));
        }
        demoted.into_iter().map(|j| j.id).collect()
    }

    /// Drop all completed jobs from the queue.
    pub fn clear_completed(&self) -> usize {
        let removed: Vec<JobId> = {
            let mut inner = self.inner.write();
            let ids: Vec<JobId> = inner
                .order
                .iter()
                .copied()
                .filter(|id| {
                    inner
                        .jobs
                        .get(id)
                        .is_some_and(|j| j.status == JobStatus::Completed)
                })
                .collect();
            inner.order.retain(|id| !ids.contains(id));
            for id in &ids {
                inner.jobs.remove(id);
            }
            ids
        };
        if !removed.is_empty() {
            self.events.emit(QueueEvent::CompletedCleared(removed.len()));
        }
        removed.len()
    }

    /// Snapshot the queue for persistence, in order.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.list().iter().map(JobSnapshot::from).collect()
    }

    /// Restore persisted jobs at the tail of the queue.
    ///
    /// A snapshot saved as `Running` comes back as `Queued`: no process
    /// from a prior run survives. Attempt counts restart at zero.
    pub fn restore(&self, snapshots: Vec<JobSnapshot>) -> usize {
        let mut restored = 0;
        for snapshot in snapshots {
            let job = snapshot.into_job();
            {
                let mut inner = self.inner.write();
                inner.order.push(job.id);
                inner.jobs.insert(job.id, job.clone());
            }
            self.events.emit(QueueEvent::JobAdded(job));
            restored += 1;
        }
        restored
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
