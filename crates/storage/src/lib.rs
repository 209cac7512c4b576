// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-storage: durable event log, snapshots, and materialized state

pub mod snapshot;
pub mod snapshotter;
pub mod state;
pub mod wal;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use snapshotter::{
    FsSnapshotIo, SnapshotHandle, SnapshotIo, SnapshotWritten, Snapshotter,
};
pub use state::{MaterializedState, Meter, QueueState, QueueStats, SecurityEvent};
pub use wal::{Wal, WalEntry, WalError};
