// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL-backed event bus for the daemon.
//!
//! Every event is applied to materialized state and appended to the WAL
//! before the caller proceeds, which is what makes the pipeline's facts
//! durable. Appends are buffered; a reader drives group-commit flushes and
//! snapshot cadence from the other side.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use wf_core::{Event, EventSink, SinkError};
use wf_storage::{MaterializedState, Wal, WalEntry, WalError};

/// Durable event sink shared by every subsystem.
#[derive(Clone)]
pub struct EventBus {
    wal: Arc<Mutex<Wal>>,
    state: Arc<Mutex<MaterializedState>>,
    wake_tx: mpsc::Sender<()>,
}

/// Reader side: drains unprocessed entries for maintenance work.
pub struct EventReader {
    wal: Arc<Mutex<Wal>>,
    wake_rx: mpsc::Receiver<()>,
}

impl EventBus {
    /// Wrap a WAL and the shared state. Returns the bus (for recording)
    /// and the reader (for the maintenance loop).
    pub fn new(wal: Wal, state: Arc<Mutex<MaterializedState>>) -> (Self, EventReader) {
        let wal = Arc::new(Mutex::new(wal));
        let (wake_tx, wake_rx) = mpsc::channel(1);
        (
            Self {
                wal: Arc::clone(&wal),
                state,
                wake_tx,
            },
            EventReader { wal, wake_rx },
        )
    }

    /// Flush buffered WAL entries to disk (single fsync).
    pub fn flush(&self) -> Result<(), WalError> {
        self.wal.lock().flush()
    }

    pub fn needs_flush(&self) -> bool {
        self.wal.lock().needs_flush()
    }

    pub fn processed_seq(&self) -> u64 {
        self.wal.lock().processed_seq()
    }

    /// Atomically capture `(write_seq, state clone)` for a snapshot.
    ///
    /// Taken under the WAL lock, so the returned state contains exactly the
    /// events with `seq <= write_seq`, so replay after this snapshot never
    /// re-applies an event the snapshot already absorbed.
    pub fn snapshot_cut(&self) -> Result<(u64, MaterializedState), WalError> {
        let mut wal = self.wal.lock();
        wal.flush()?;
        let seq = wal.write_seq();
        let state = self.state.lock().clone();
        Ok((seq, state))
    }

    /// Shared WAL handle (snapshot truncation).
    pub fn wal(&self) -> Arc<Mutex<Wal>> {
        Arc::clone(&self.wal)
    }
}

impl EventSink for EventBus {
    fn record(&self, event: Event) -> Result<u64, SinkError> {
        // Append and apply under the WAL lock so a snapshot cut always sees
        // a state that matches its sequence number exactly. Callers never
        // hold the state lock across a record, so the nesting is safe.
        let seq = {
            let mut wal = self.wal.lock();
            let seq = wal.append(&event).map_err(|e| SinkError(e.to_string()))?;
            self.state.lock().apply_event(&event);
            seq
        };
        // Non-blocking wake: a full channel means the reader is already awake
        let _ = self.wake_tx.try_send(());
        Ok(seq)
    }
}

impl EventReader {
    /// Wait for and return the next unprocessed entry.
    ///
    /// Returns `None` when the bus is closed (all senders dropped).
    pub async fn recv(&mut self) -> Result<Option<WalEntry>, WalError> {
        loop {
            {
                let mut wal = self.wal.lock();
                if let Some(entry) = wal.next_unprocessed()? {
                    return Ok(Some(entry));
                }
            }
            if self.wake_rx.recv().await.is_none() {
                return Ok(None);
            }
        }
    }

    /// Advance the processed cursor (persisted via snapshots).
    pub fn mark_processed(&self, seq: u64) {
        self.wal.lock().mark_processed(seq);
    }

    pub fn wal(&self) -> Arc<Mutex<Wal>> {
        Arc::clone(&self.wal)
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
