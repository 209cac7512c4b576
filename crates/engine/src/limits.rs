// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Limit controller: global pause/resume driven by upstream signals.
//!
//! Observes `usage_limit_exceeded` and `system_config_error` failures from
//! workers, sets the rate-limit state, and pauses the queue runtime with a
//! reason and a deadline. A watcher task auto-resumes at the reset time;
//! a manual clear resumes immediately. The controller is the only
//! programmatic caller of the queue's pause capability.

use crate::error::RuntimeError;
use crate::queue::QueueRuntime;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wf_core::{Clock, Event, EventSink, FailureKind, RateLimitState};
use wf_storage::MaterializedState;

/// Cooldown applied when a trip has no upstream reset time
/// (system configuration errors).
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Poll cadence of the auto-resume watcher.
const WATCH_TICK: Duration = Duration::from_millis(250);

struct LimitInner<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    queue: QueueRuntime<C>,
    cooldown: Duration,
    watcher_running: AtomicBool,
}

/// Singleton controller constructed at boot and handed to subsystems.
pub struct LimitController<C: Clock> {
    inner: Arc<LimitInner<C>>,
}

impl<C: Clock> Clone for LimitController<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> LimitController<C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        clock: C,
        queue: QueueRuntime<C>,
    ) -> Self {
        Self {
            inner: Arc::new(LimitInner {
                state,
                sink,
                clock,
                queue,
                cooldown: DEFAULT_COOLDOWN,
                watcher_running: AtomicBool::new(false),
            }),
        }
    }

    /// Current limit state, if active.
    pub fn active(&self) -> Option<RateLimitState> {
        let state = self.inner.state.lock();
        state.rate_limit.active.then(|| state.rate_limit.clone())
    }

    /// Seconds a caller should wait before retrying (`Retry-After`).
    pub fn retry_after_secs(&self) -> Option<u64> {
        let now = self.inner.clock.epoch_ms();
        self.active().map(|limit| limit.retry_after_secs(now))
    }

    /// Classify a worker failure; trip the controller when it is a
    /// pause-worthy kind. Returns whether a trip happened.
    pub fn observe(&self, kind: &FailureKind) -> Result<bool, RuntimeError> {
        if !kind.trips_limit_pause() {
            return Ok(false);
        }
        let reset_at_ms = match kind {
            FailureKind::UsageLimitExceeded { reset_at_ms } => *reset_at_ms,
            _ => None,
        };
        self.trip(kind.as_str(), reset_at_ms)?;
        Ok(true)
    }

    /// Activate the limit: record state, pause all queues, arm auto-resume.
    pub fn trip(&self, reason: &str, reset_at_ms: Option<u64>) -> Result<(), RuntimeError> {
        let reset_at_ms =
            reset_at_ms.unwrap_or_else(|| {
                self.inner.clock.epoch_ms() + self.inner.cooldown.as_millis() as u64
            });
        warn!(reason, reset_at_ms, "limit tripped, pausing queues");
        self.inner.sink.record(Event::LimitTripped {
            reason: reason.to_string(),
            reset_at_ms: Some(reset_at_ms),
        })?;
        self.inner.queue.pause(None, reason)?;
        self.spawn_watcher();
        Ok(())
    }

    /// Immediately clear the limit and resume queues (manual clear surface).
    pub fn clear(&self) -> Result<(), RuntimeError> {
        info!("limit cleared, resuming queues");
        self.inner.sink.record(Event::LimitCleared)?;
        self.inner.queue.resume(None)?;
        Ok(())
    }

    /// Clear only when the reset deadline has passed. Returns whether a
    /// clear happened.
    pub fn clear_if_expired(&self) -> Result<bool, RuntimeError> {
        let expired = {
            let state = self.inner.state.lock();
            state.rate_limit.active
                && state
                    .rate_limit
                    .reset_at_ms
                    .is_some_and(|reset| reset <= self.inner.clock.epoch_ms())
        };
        if expired {
            self.clear()?;
        }
        Ok(expired)
    }

    /// Re-arm after boot: if the replayed state says the limit is active,
    /// make sure the queues are paused and the resume watcher is running.
    pub fn rearm(&self) -> Result<(), RuntimeError> {
        if let Some(limit) = self.active() {
            let reason = limit.reason.unwrap_or_else(|| "rate_limited".into());
            self.inner.queue.pause(None, &reason)?;
            self.spawn_watcher();
        }
        Ok(())
    }

    fn spawn_watcher(&self) {
        if self.inner.watcher_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_TICK).await;
                match controller.clear_if_expired() {
                    Ok(true) => break,
                    Ok(false) => {
                        if controller.active().is_none() {
                            // Someone cleared manually
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "auto-resume check failed");
                    }
                }
            }
            controller
                .inner
                .watcher_running
                .store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
#[path = "limits_tests.rs"]
mod tests;
