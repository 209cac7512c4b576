// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background snapshot writer with durable fsync ordering.
//!
//! The writer runs I/O off the engine thread. The key invariant: the
//! snapshot must be durable, including the directory fsync after rename,
//! before the WAL is truncated. Losing that ordering can lose events.
//!
//! ```text
//! Engine thread                   Background thread
//! ────────────────────────────    ─────────────────────────────
//! clone state
//!   │
//!   └─────────────────────────→   serialize + compress
//!                                 write .tmp, fsync .tmp
//!                                 rename → snapshot
//!                                 fsync directory
//!                                   │
//!   ←────────────────────────────┘ (completion)
//! truncate WAL (safe now)
//! ```
//!
//! All file operations go through [`SnapshotIo`] so tests can inject faults
//! and verify the ordering.

use crate::{MaterializedState, Snapshot, SnapshotError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Result of a completed snapshot write.
#[derive(Debug, Clone)]
pub struct SnapshotWritten {
    pub seq: u64,
    pub size_bytes: u64,
}

/// Trait abstracting snapshot I/O for testability.
pub trait SnapshotIo: Send + Sync + 'static {
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), SnapshotError>;
    fn fsync_file(&self, path: &Path) -> Result<(), SnapshotError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), SnapshotError>;
    fn fsync_dir(&self, path: &Path) -> Result<(), SnapshotError>;
    fn file_size(&self, path: &Path) -> Result<u64, SnapshotError>;
}

/// Production I/O against the real filesystem.
#[derive(Clone)]
pub struct FsSnapshotIo;

impl SnapshotIo for FsSnapshotIo {
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), SnapshotError> {
        File::open(path)?.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SnapshotError> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), SnapshotError> {
        File::open(path)?.sync_all()?;
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64, SnapshotError> {
        Ok(std::fs::metadata(path)?.len())
    }
}

/// Handle to an in-flight background snapshot.
pub struct SnapshotHandle {
    pub seq: u64,
    receiver: mpsc::Receiver<Result<SnapshotWritten, SnapshotError>>,
    // NOTE(lifetime): keep thread alive
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl SnapshotHandle {
    /// Block until the snapshot is fully durable. Only after this returns
    /// successfully is it safe to truncate the WAL.
    pub fn wait(self) -> Result<SnapshotWritten, SnapshotError> {
        self.receiver
            .recv()
            .map_err(|_| SnapshotError::Compress("snapshot thread panicked".into()))?
    }

    /// Non-blocking completion check.
    pub fn try_wait(&self) -> Option<Result<SnapshotWritten, SnapshotError>> {
        self.receiver.try_recv().ok()
    }
}

/// Manages background snapshot writes. One at a time.
pub struct Snapshotter<W: SnapshotIo = FsSnapshotIo> {
    io: W,
    path: PathBuf,
}

impl Snapshotter<FsSnapshotIo> {
    pub fn new(path: PathBuf) -> Self {
        Self::with_io(FsSnapshotIo, path)
    }
}

impl<W: SnapshotIo + Clone> Snapshotter<W> {
    pub fn with_io(io: W, path: PathBuf) -> Self {
        Self { io, path }
    }

    /// Start a background snapshot of `state` at WAL sequence `seq`.
    pub fn start(&self, seq: u64, state: &MaterializedState) -> SnapshotHandle {
        let snapshot = Snapshot::new(seq, state.clone());
        let io = self.io.clone();
        let path = self.path.clone();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let _ = tx.send(write_snapshot(&io, &snapshot, &path));
        });

        SnapshotHandle {
            seq,
            receiver: rx,
            handle,
        }
    }

    /// Synchronous snapshot (shutdown path).
    pub fn write_sync(
        &self,
        seq: u64,
        state: &MaterializedState,
    ) -> Result<SnapshotWritten, SnapshotError> {
        write_snapshot(&self.io, &Snapshot::new(seq, state.clone()), &self.path)
    }
}

fn write_snapshot<W: SnapshotIo>(
    io: &W,
    snapshot: &Snapshot,
    path: &Path,
) -> Result<SnapshotWritten, SnapshotError> {
    let tmp = path.with_extension("tmp");
    let data = snapshot.encode()?;

    io.write_tmp(&tmp, &data)?;
    io.fsync_file(&tmp)?;
    io.rename(&tmp, path)?;
    // Rename durability, required before WAL truncation
    if let Some(parent) = path.parent() {
        io.fsync_dir(parent)?;
    }

    let size_bytes = io.file_size(path).unwrap_or(data.len() as u64);
    Ok(SnapshotWritten {
        seq: snapshot.seq,
        size_bytes,
    })
}

#[cfg(test)]
#[path = "snapshotter_tests.rs"]
mod tests;
