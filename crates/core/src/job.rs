// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue job records and retry math.

use crate::failure::FailureKind;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Caller-supplied queue job id.
    ///
    /// Deterministic ids (`build:{project}:{operation}`) make duplicate
    /// enqueues collapse into one job.
    pub struct JobId;
}

/// Backoff delays are capped so a long retry chain cannot push a job hours
/// into the future.
pub const BACKOFF_CAP_MS: u64 = 5 * 60 * 1000;

/// Exponential backoff without jitter: `base * 2^(attempt-1)`, capped.
///
/// Attempt numbers are 1-based; attempt 0 is treated as 1.
pub fn exponential_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(20);
    base_ms.saturating_mul(1u64 << exp).min(BACKOFF_CAP_MS)
}

/// Status of a queue job through its lifecycle.
///
/// `Waiting` covers both "not yet run" and "scheduled for retry" (the
/// `run_at_ms` field says when). `Failed` means retries were exhausted;
/// `Dead` means a handler reported an unrecoverable kind and the runtime
/// stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Dead => write!(f, "dead"),
        }
    }
}

/// Enqueue options (attempts, backoff, priority, delay, retention).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOpts {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    /// Higher dispatches first; ties break by enqueue time.
    pub priority: i32,
    pub delay_ms: u64,
    /// Completed jobs retained per queue before pruning.
    pub remove_on_complete: u32,
    /// Failed/dead jobs retained per queue before pruning.
    pub remove_on_fail: u32,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 1000,
            priority: 0,
            delay_ms: 0,
            remove_on_complete: 1000,
            remove_on_fail: 2000,
        }
    }
}

/// A job persisted in a named queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Attempts started so far (grows only when a handler actually runs).
    #[serde(default)]
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub priority: i32,
    /// Earliest dispatch time (delay or retry backoff).
    pub run_at_ms: u64,
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub remove_on_complete: u32,
    #[serde(default)]
    pub remove_on_fail: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl QueueJob {
    pub fn new(
        id: JobId,
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        opts: EnqueueOpts,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            name: name.into(),
            payload,
            state: JobState::Waiting,
            attempt: 0,
            max_attempts: opts.attempts.max(1),
            backoff_base_ms: opts.backoff_base_ms,
            priority: opts.priority,
            run_at_ms: now_ms + opts.delay_ms,
            enqueued_at_ms: now_ms,
            remove_on_complete: opts.remove_on_complete,
            remove_on_fail: opts.remove_on_fail,
            error: None,
            failure_kind: None,
        }
    }

    /// Ready for dispatch at `now_ms`.
    pub fn is_ready(&self, now_ms: u64) -> bool {
        self.state == JobState::Waiting && self.run_at_ms <= now_ms
    }

    /// Whether another retry is allowed after the current attempt failed.
    pub fn retries_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// A cron-scheduled job template with a stable identity.
///
/// Identity is `repeat:{queue}:{name}`, so re-registering the same schedule
/// after a reboot does not multiply it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeatable {
    pub name: String,
    pub queue: String,
    /// Cron expression (seconds-resolution, `cron` crate syntax).
    pub schedule: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at_ms: Option<u64>,
}

impl Repeatable {
    pub fn identity(&self) -> String {
        format!("repeat:{}:{}", self.queue, self.name)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
