//! Job queue
//!
//! Holds pending, processing and failed jobs in operator order and hands
//! them to the device link one at a time. Completed jobs leave the queue;
//! failed jobs stay with their error until retried or removed.
//!
//! All mutations go through one lock, so reorder, remove and enqueue never
//! interleave. Dispatch is guarded separately: a second `process_next`
//! while one is running is rejected outright.

use crate::job::{Job, JobKind, JobStatus};
use crate::store::JobStore;
use parking_lot::Mutex;
use plotterkit_communication::{AuxiliaryController, DeviceLink, RecoveryPoint, SendControl};
use plotterkit_core::{
    AppEvent, EventBus, JobEvent, Precondition, QueueError, QueueEvent, QueueSummary, StreamEvent,
};
use plotterkit_designer::MotionProgram;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Ordered jobs and the single-dispatch state machine
pub struct JobQueue {
    jobs: Mutex<Vec<Job>>,
    dispatching: AtomicBool,
    current: Mutex<Option<SendControl>>,
    link: Arc<DeviceLink>,
    auxiliary: Arc<dyn AuxiliaryController>,
    bus: Arc<EventBus>,
    store: Option<JobStore>,
}

impl JobQueue {
    /// In-memory queue
    pub fn new(
        link: Arc<DeviceLink>,
        auxiliary: Arc<dyn AuxiliaryController>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            dispatching: AtomicBool::new(false),
            current: Mutex::new(None),
            link,
            auxiliary,
            bus,
            store: None,
        }
    }

    /// Queue backed by a job store; stored jobs are loaded immediately
    pub fn with_store(
        link: Arc<DeviceLink>,
        auxiliary: Arc<dyn AuxiliaryController>,
        bus: Arc<EventBus>,
        store: JobStore,
    ) -> Result<Self, QueueError> {
        let jobs = store.load()?;
        tracing::info!(
            "Loaded {} jobs from {}",
            jobs.len(),
            store.path().display()
        );
        let queue = Self {
            jobs: Mutex::new(jobs),
            store: Some(store),
            ..Self::new(link, auxiliary, bus)
        };
        queue.persist();
        Ok(queue)
    }

    /// Device link used for dispatch
    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    /// Append a pending job
    pub fn enqueue(&self, kind: JobKind, name: impl Into<String>, program: MotionProgram) -> Job {
        let job = Job::new(kind, name, program);
        tracing::info!(job_id = %job.id, "Enqueued {} job '{}' ({} lines)", job.kind, job.name, job.total_lines);
        self.jobs.lock().push(job.clone());
        self.changed();
        job
    }

    /// Snapshot of every job in queue order
    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    /// Snapshot of one job
    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().iter().find(|j| j.id == id).cloned()
    }

    /// Number of jobs
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the queue holds no jobs
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Recovery point of the most recently failed job, if any
    pub fn last_failure_point(&self) -> Option<(Uuid, RecoveryPoint)> {
        self.jobs
            .lock()
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .filter_map(|j| Some((j.id, j.recovery?, j.failed_at?)))
            .max_by_key(|(_, _, failed_at)| *failed_at)
            .map(|(id, point, _)| (id, point))
    }

    /// Counts by status
    pub fn summary(&self) -> QueueSummary {
        summarize(&self.jobs.lock())
    }

    /// Whether a job is streaming
    pub fn is_processing(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    /// Remove a job that is not processing
    pub fn remove(&self, id: Uuid) -> Result<Job, QueueError> {
        let removed = {
            let mut jobs = self.jobs.lock();
            let index = jobs
                .iter()
                .position(|j| j.id == id)
                .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
            if jobs[index].is_processing() {
                return Err(QueueError::JobProcessing { id: id.to_string() });
            }
            jobs.remove(index)
        };
        tracing::info!(job_id = %id, "Removed job '{}'", removed.name);
        self.changed();
        Ok(removed)
    }

    /// Move the pending job at `from` to position `to`.
    ///
    /// Both positions must hold pending jobs; otherwise the queue is left
    /// unchanged.
    pub fn reorder(&self, from: usize, to: usize) -> Result<(), QueueError> {
        {
            let mut jobs = self.jobs.lock();
            let len = jobs.len();
            for index in [from, to] {
                if index >= len {
                    return Err(QueueError::IndexOutOfRange { index, len });
                }
                if !jobs[index].is_pending() {
                    return Err(QueueError::NotPending { index });
                }
            }
            if from == to {
                return Ok(());
            }
            let job = jobs.remove(from);
            jobs.insert(to, job);
        }
        tracing::debug!("Moved job from {} to {}", from, to);
        self.changed();
        Ok(())
    }

    /// Drop every job; rejected while one is processing
    pub fn clear(&self) -> Result<usize, QueueError> {
        let cleared = {
            let mut jobs = self.jobs.lock();
            if self.is_processing() || jobs.iter().any(Job::is_processing) {
                return Err(QueueError::QueueBusy);
            }
            let n = jobs.len();
            jobs.clear();
            n
        };
        tracing::info!("Cleared {} jobs", cleared);
        self.changed();
        Ok(cleared)
    }

    /// Put a failed job back in line
    pub fn retry(&self, id: Uuid) -> Result<(), QueueError> {
        {
            let mut jobs = self.jobs.lock();
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
            match job.status {
                JobStatus::Processing => {
                    return Err(QueueError::JobProcessing { id: id.to_string() })
                }
                JobStatus::Pending => return Ok(()),
                JobStatus::Completed | JobStatus::Failed => job.mark_pending(),
            }
        }
        tracing::info!(job_id = %id, "Job queued for retry");
        self.changed();
        Ok(())
    }

    /// Pause the running job before its next line
    pub fn pause_current(&self) -> bool {
        self.with_current(SendControl::pause)
    }

    /// Resume the running job
    pub fn resume_current(&self) -> bool {
        self.with_current(SendControl::resume)
    }

    /// Cancel the running job; it fails and stays in the queue
    pub fn cancel_current(&self) -> bool {
        self.with_current(SendControl::cancel)
    }

    fn with_current(&self, f: impl FnOnce(&SendControl)) -> bool {
        match self.current.lock().as_ref() {
            Some(control) => {
                f(control);
                true
            }
            None => false,
        }
    }

    /// Every dispatch precondition that does not hold right now
    pub fn unmet_preconditions(&self) -> Vec<Precondition> {
        let mut unmet = Vec::new();
        if !self.link.is_connected() {
            unmet.push(Precondition::DeviceNotConnected);
        }
        if !self.auxiliary.is_connected() {
            unmet.push(Precondition::AuxiliaryNotConnected);
        }
        unmet
    }

    /// Stream the first pending job.
    ///
    /// Requires an open device link and a connected auxiliary controller;
    /// when either is missing, all missing preconditions are reported
    /// together and nothing changes. Stream events are relayed on the bus
    /// with the job id and completion percentage. Returns the job in its
    /// final state: completed jobs are removed from the queue, failed ones
    /// stay with the captured error.
    pub async fn process_next(&self) -> Result<Job, QueueError> {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("process_next rejected: a job is already processing");
            return Err(QueueError::AlreadyProcessing);
        }
        let _guard = DispatchGuard(&self.dispatching);

        let unmet = self.unmet_preconditions();
        if !unmet.is_empty() {
            let err = QueueError::PreconditionsUnmet { unmet };
            tracing::warn!("{}", err);
            return Err(err);
        }

        let (job_id, lines) = {
            let mut jobs = self.jobs.lock();
            let job = jobs
                .iter_mut()
                .find(|j| j.is_pending())
                .ok_or(QueueError::NoPendingJobs)?;
            job.mark_processing();
            tracing::info!(job_id = %job.id, "Processing job '{}'", job.name);
            (job.id, job.program.to_lines())
        };
        self.publish(QueueEvent::JobStarted { job_id });
        self.changed();

        let control = SendControl::new();
        *self.current.lock() = Some(control.clone());

        let mut events = self.link.subscribe();
        let send = self.link.send_program(&lines, control);
        tokio::pin!(send);
        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                event = events.recv() => match event {
                    Ok(event) => self.relay(job_id, event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = %job_id, "Dropped {} stream events", skipped);
                    }
                    Err(RecvError::Closed) => break (&mut send).await,
                },
            }
        };
        while let Ok(event) = events.try_recv() {
            self.relay(job_id, event);
        }
        *self.current.lock() = None;

        let finished = {
            let mut jobs = self.jobs.lock();
            let index = jobs
                .iter()
                .position(|j| j.id == job_id)
                .ok_or_else(|| QueueError::JobNotFound {
                    id: job_id.to_string(),
                })?;
            match &result {
                Ok(_) => {
                    let mut job = jobs.remove(index);
                    job.mark_completed();
                    job
                }
                Err(e) => {
                    jobs[index].mark_failed(e.to_string(), Some(self.link.last_position()));
                    jobs[index].clone()
                }
            }
        };

        match &result {
            Ok(summary) => {
                tracing::info!(
                    job_id = %job_id,
                    "Job completed: {} lines in {:.1}s",
                    summary.total_lines,
                    summary.elapsed.as_secs_f64()
                );
                self.publish(QueueEvent::JobCompleted { job_id });
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, "Job failed: {}", e);
                self.publish(QueueEvent::JobFailed {
                    job_id,
                    error: e.to_string(),
                });
            }
        }
        self.changed();
        Ok(finished)
    }

    fn relay(&self, job_id: Uuid, event: StreamEvent) {
        let percent = {
            let mut jobs = self.jobs.lock();
            match jobs.iter_mut().find(|j| j.id == job_id) {
                Some(job) => {
                    match &event {
                        StreamEvent::Progress { current, total, .. } => {
                            job.current_line = *current;
                            job.total_lines = *total;
                        }
                        StreamEvent::Complete { total_lines, .. } => {
                            job.current_line = *total_lines;
                            job.total_lines = *total_lines;
                        }
                        _ => {}
                    }
                    job.percent()
                }
                None => 0.0,
            }
        };
        self.bus.publish(AppEvent::Job(JobEvent {
            job_id,
            percent,
            event,
        }));
    }

    fn publish(&self, event: QueueEvent) {
        self.bus.publish(AppEvent::Queue(event));
    }

    fn changed(&self) {
        let summary = self.summary();
        self.persist();
        self.publish(QueueEvent::Changed { summary });
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            let jobs = self.jobs.lock();
            if let Err(e) = store.save(&jobs) {
                tracing::warn!("Failed to persist job queue: {}", e);
            }
        }
    }
}

fn summarize(jobs: &[Job]) -> QueueSummary {
    let mut summary = QueueSummary {
        total: jobs.len(),
        ..QueueSummary::default()
    };
    for job in jobs {
        match job.status {
            JobStatus::Pending => summary.pending += 1,
            JobStatus::Processing => summary.processing += 1,
            JobStatus::Completed => summary.completed += 1,
            JobStatus::Failed => summary.failed += 1,
        }
    }
    summary
}
