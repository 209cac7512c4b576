// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event sink port.
//!
//! Subsystems record events through this trait instead of reaching for a
//! global bus; the daemon wires its WAL-backed bus in at boot, tests wire in
//! a recording sink.

use crate::event::Event;
use thiserror::Error;

/// Failure to durably record an event.
#[derive(Debug, Error)]
#[error("event sink error: {0}")]
pub struct SinkError(pub String);

/// Durably records an event and applies it to shared state.
///
/// Implementations must be safe to call from any task; ordering is defined
/// by the sequence numbers they return.
pub trait EventSink: Send + Sync {
    /// Record one event. Returns the assigned sequence number.
    fn record(&self, event: Event) -> Result<u64, SinkError>;
}
