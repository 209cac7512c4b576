// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test sink for crates above storage.
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::MaterializedState;
use parking_lot::Mutex;
use std::sync::Arc;
use wf_core::{Event, EventSink, SinkError};

/// In-memory sink: applies events to shared state and keeps the log.
#[derive(Clone)]
pub struct MemorySink {
    pub state: Arc<Mutex<MaterializedState>>,
    log: Arc<Mutex<Vec<Event>>>,
    seq: Arc<Mutex<u64>>,
    fail: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new(state: Arc<Mutex<MaterializedState>>) -> Self {
        Self {
            state,
            log: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(Mutex::new(0)),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Every event recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    /// Make the next `record` calls fail (write-failure paths).
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    /// Count events matching a predicate.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.log.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) -> Result<u64, SinkError> {
        if *self.fail.lock() {
            return Err(SinkError("simulated sink failure".into()));
        }
        self.state.lock().apply_event(&event);
        self.log.lock().push(event);
        let mut seq = self.seq.lock();
        *seq += 1;
        Ok(*seq)
    }
}
