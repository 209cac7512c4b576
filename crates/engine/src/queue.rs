// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable multi-queue scheduler.
//!
//! Queues live in materialized state (every transition is an event), so
//! jobs survive restarts and the dispatcher re-arms itself from `run_at`
//! values at boot. Per queue: a registered handler, a small fixed worker
//! pool, priority + delayed dispatch, exponential backoff with jitter,
//! cron repeatables with stable identities, and an unrecoverable channel
//! that stops retries cold.
//!
//! No ordering is promised across jobs. Within a job, a handler runs to
//! completion before the next attempt starts.

use crate::error::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use wf_core::{
    exponential_backoff_ms, Clock, EnqueueOpts, Event, EventSink, FailureKind, JobId, QueueJob,
    Repeatable,
};
use wf_storage::{MaterializedState, QueueStats};

/// Idle poll interval of a dispatcher (delayed jobs, clock advancement).
const DISPATCH_TICK: Duration = Duration::from_millis(25);

/// How a handler reports failure. Unrecoverable kinds stop retries.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Retries are inappropriate for this failure.
    pub fn unrecoverable(&self) -> bool {
        !self.kind.is_retryable()
    }
}

/// Successful handler outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobVerdict {
    Completed,
    /// Re-check later without consuming an attempt (rollback window).
    Deferred { delay: Duration },
}

/// A queue worker.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, job: QueueJob) -> Result<JobVerdict, JobError>;
}

/// Worker-pool options for a registered queue.
#[derive(Debug, Clone)]
pub struct WorkerOpts {
    pub concurrency: usize,
}

impl Default for WorkerOpts {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

struct QueueInner<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    wake: Notify,
    closed: AtomicBool,
}

/// Durable multi-queue scheduler. Cheap to clone; all clones share state.
pub struct QueueRuntime<C: Clock> {
    inner: Arc<QueueInner<C>>,
}

impl<C: Clock> Clone for QueueRuntime<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> QueueRuntime<C> {
    pub fn new(state: Arc<Mutex<MaterializedState>>, sink: Arc<dyn EventSink>, clock: C) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state,
                sink,
                clock,
                wake: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a job. Idempotent by `job_id`: a second enqueue with the same
    /// id is a no-op returning the same id.
    pub fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        opts: EnqueueOpts,
        job_id: JobId,
    ) -> Result<JobId, RuntimeError> {
        let job = QueueJob::new(
            job_id.clone(),
            queue,
            name,
            payload,
            opts,
            self.inner.clock.epoch_ms(),
        );
        self.inner.sink.record(Event::JobEnqueued { job })?;
        self.inner.wake.notify_waiters();
        Ok(job_id)
    }

    /// Register a handler and start the queue's dispatch loop.
    pub fn register_worker(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
        opts: WorkerOpts,
    ) {
        info!(queue, concurrency = opts.concurrency, "worker registered");
        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();
        tokio::spawn(dispatch_loop(inner, queue, handler, opts.concurrency.max(1)));
    }

    /// Pause one queue, or every queue when `queue` is `None`. A paused
    /// queue accepts enqueues but delivers no work.
    pub fn pause(&self, queue: Option<&str>, reason: &str) -> Result<(), RuntimeError> {
        self.inner.sink.record(Event::QueuePaused {
            queue: queue.map(String::from),
            reason: reason.to_string(),
        })?;
        Ok(())
    }

    pub fn resume(&self, queue: Option<&str>) -> Result<(), RuntimeError> {
        self.inner.sink.record(Event::QueueResumed {
            queue: queue.map(String::from),
        })?;
        self.inner.wake.notify_waiters();
        Ok(())
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        self.inner.state.lock().queue_stats(queue)
    }

    /// Register a cron-repeatable job. Identity is `repeat:{queue}:{name}`,
    /// stable across reboots.
    pub fn add_repeatable(
        &self,
        queue: &str,
        schedule: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), RuntimeError> {
        cron::Schedule::from_str(schedule)
            .map_err(|e| RuntimeError::InvalidSchedule(format!("{schedule}: {e}")))?;
        self.inner.sink.record(Event::RepeatableAdded {
            repeatable: Repeatable {
                name: name.to_string(),
                queue: queue.to_string(),
                schedule: schedule.to_string(),
                payload,
                last_fired_at_ms: None,
            },
        })?;
        self.inner.wake.notify_waiters();
        Ok(())
    }

    /// Wake all dispatchers (used after external state changes).
    pub fn kick(&self) {
        self.inner.wake.notify_waiters();
    }

    /// Stop dispatching. In-flight handlers run to completion.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }
}

async fn dispatch_loop<C: Clock>(
    inner: Arc<QueueInner<C>>,
    queue: String,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
) {
    let pool = Arc::new(Semaphore::new(concurrency));

    loop {
        if inner.closed.load(Ordering::SeqCst) {
            debug!(queue, "dispatcher shutting down");
            break;
        }

        fire_due_repeatables(&inner, &queue);

        let now = inner.clock.epoch_ms();
        let next = {
            let state = inner.state.lock();
            if state.queue_dispatchable(&queue) {
                pick_ready(&state, &queue, now)
            } else {
                None
            }
        };

        let Some(mut job) = next else {
            idle_wait(&inner).await;
            continue;
        };

        if pool.available_permits() == 0 {
            idle_wait(&inner).await;
            continue;
        }
        // Pool has room and this is the only dispatcher for the queue
        let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
            break;
        };

        let attempt = job.attempt + 1;
        if let Err(e) = inner.sink.record(Event::JobStarted {
            queue: queue.clone(),
            job_id: job.id.clone(),
            attempt,
            at_ms: now,
        }) {
            error!(queue, job_id = %job.id, error = %e, "failed to record job start");
            drop(permit);
            idle_wait(&inner).await;
            continue;
        }
        job.attempt = attempt;

        let inner_run = Arc::clone(&inner);
        let handler_run = Arc::clone(&handler);
        let queue_run = queue.clone();
        tokio::spawn(async move {
            run_one(inner_run, queue_run, handler_run, job).await;
            drop(permit);
        });
    }
}

async fn idle_wait<C: Clock>(inner: &QueueInner<C>) {
    tokio::select! {
        _ = inner.wake.notified() => {}
        _ = tokio::time::sleep(DISPATCH_TICK) => {}
    }
}

/// Highest priority first; ties go to the earliest-runnable job.
fn pick_ready(state: &MaterializedState, queue: &str, now: u64) -> Option<QueueJob> {
    state
        .queues
        .get(queue)?
        .jobs
        .iter()
        .filter(|j| j.is_ready(now))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.run_at_ms.cmp(&a.run_at_ms))
                .then(b.enqueued_at_ms.cmp(&a.enqueued_at_ms))
        })
        .cloned()
}

async fn run_one<C: Clock>(
    inner: Arc<QueueInner<C>>,
    queue: String,
    handler: Arc<dyn JobHandler>,
    job: QueueJob,
) {
    let job_id = job.id.clone();
    let attempt = job.attempt;
    let max_attempts = job.max_attempts;
    let backoff_base = job.backoff_base_ms;

    let result = handler.run(job).await;
    let now = inner.clock.epoch_ms();

    let event = match result {
        Ok(JobVerdict::Completed) => Event::JobCompleted {
            queue: queue.clone(),
            job_id: job_id.clone(),
        },
        Ok(JobVerdict::Deferred { delay }) => Event::JobDeferred {
            queue: queue.clone(),
            job_id: job_id.clone(),
            run_at_ms: now + delay.as_millis() as u64,
            attempt: attempt.saturating_sub(1),
        },
        Err(e) if e.unrecoverable() => {
            warn!(queue, job_id = %job_id, kind = %e.kind, "job unrecoverable, not retrying");
            Event::JobDead {
                queue: queue.clone(),
                job_id: job_id.clone(),
                kind: e.kind,
                error: e.message,
            }
        }
        Err(e) if attempt >= max_attempts => {
            warn!(queue, job_id = %job_id, attempt, "job out of retries");
            Event::JobFailed {
                queue: queue.clone(),
                job_id: job_id.clone(),
                error: e.message,
                kind: Some(e.kind),
                retry_at_ms: None,
            }
        }
        Err(e) => {
            let backoff = exponential_backoff_ms(backoff_base, attempt) + jitter_ms(backoff_base);
            debug!(queue, job_id = %job_id, attempt, backoff_ms = backoff, "job failed, retrying");
            Event::JobFailed {
                queue: queue.clone(),
                job_id: job_id.clone(),
                error: e.message,
                kind: Some(e.kind),
                retry_at_ms: Some(now + backoff),
            }
        }
    };

    if let Err(e) = inner.sink.record(event) {
        error!(queue, job_id = %job_id, error = %e, "failed to record job outcome");
    }
    inner.wake.notify_waiters();
}

/// Up to a quarter of the base, so synchronized retries spread out.
fn jitter_ms(base_ms: u64) -> u64 {
    if base_ms < 4 {
        return 0;
    }
    rand::rng().random_range(0..base_ms / 4)
}

/// Fire cron repeatables whose next occurrence has passed.
///
/// The spawned job id embeds the occurrence timestamp, so a reboot that
/// replays the same occurrence collapses into the existing job.
fn fire_due_repeatables<C: Clock>(inner: &Arc<QueueInner<C>>, queue: &str) {
    let now_ms = inner.clock.epoch_ms();
    let mut due: Vec<(Repeatable, u64)> = Vec::new();
    let mut unbaselined: Vec<String> = Vec::new();
    {
        let state = inner.state.lock();
        let Some(entry) = state.queues.get(queue) else {
            return;
        };
        if !state.queue_dispatchable(queue) {
            return;
        }
        for repeatable in &entry.repeatables {
            match repeatable.last_fired_at_ms {
                // Baseline at registration so past occurrences don't storm
                None => unbaselined.push(repeatable.name.clone()),
                Some(base) => {
                    if let Some(at) = next_occurrence(&repeatable.schedule, base, now_ms) {
                        due.push((repeatable.clone(), at));
                    }
                }
            }
        }
    }

    for name in unbaselined {
        if let Err(e) = inner.sink.record(Event::RepeatableFired {
            queue: queue.to_string(),
            name,
            at_ms: now_ms,
        }) {
            error!(queue, error = %e, "failed to baseline repeatable");
            return;
        }
    }

    for (repeatable, fire_at) in due {
        let job_id = JobId::new(format!("{}:{}", repeatable.identity(), fire_at));
        let enqueue = Event::JobEnqueued {
            job: QueueJob::new(
                job_id,
                queue,
                &repeatable.name,
                repeatable.payload.clone(),
                EnqueueOpts::default(),
                now_ms,
            ),
        };
        let fired = Event::RepeatableFired {
            queue: queue.to_string(),
            name: repeatable.name.clone(),
            at_ms: fire_at,
        };
        for event in [enqueue, fired] {
            if let Err(e) = inner.sink.record(event) {
                error!(queue, repeatable = repeatable.name, error = %e, "failed to fire repeatable");
                return;
            }
        }
    }
}

/// The next occurrence strictly after `baseline_ms`, if it is already due.
fn next_occurrence(schedule: &str, baseline_ms: u64, now_ms: u64) -> Option<u64> {
    let schedule = cron::Schedule::from_str(schedule).ok()?;
    let baseline = DateTime::<Utc>::from_timestamp_millis(baseline_ms as i64)?;
    let next = schedule.after(&baseline).next()?;
    let next_ms = next.timestamp_millis().max(0) as u64;
    (next_ms <= now_ms).then_some(next_ms)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
