// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::queue::{JobError, JobHandler, JobVerdict};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use wf_core::{FakeClock, QueueJob};
use wf_storage::test_support::MemorySink;
use wf_storage::MaterializedState;

/// Fresh state + sink + fake clock at t=1_000_000.
pub fn fixture() -> (
    Arc<Mutex<MaterializedState>>,
    MemorySink,
    FakeClock,
) {
    let state = Arc::new(Mutex::new(MaterializedState::default()));
    let sink = MemorySink::new(Arc::clone(&state));
    (state, sink, FakeClock::new(1_000_000))
}

/// Handler serving scripted results FIFO (default: completed), recording
/// every job it ran.
#[derive(Default)]
pub struct ScriptedHandler {
    results: Mutex<VecDeque<Result<JobVerdict, JobError>>>,
    runs: Mutex<Vec<QueueJob>>,
}

impl ScriptedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: Result<JobVerdict, JobError>) {
        self.results.lock().push_back(result);
    }

    pub fn runs(&self) -> Vec<QueueJob> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn run(&self, job: QueueJob) -> Result<JobVerdict, JobError> {
        self.runs.lock().push(job);
        self.results
            .lock()
            .pop_front()
            .unwrap_or(Ok(JobVerdict::Completed))
    }
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
