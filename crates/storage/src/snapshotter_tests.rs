// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Snapshot;
use std::sync::{Arc, Mutex};

/// Records the order of I/O operations and optionally injects a failure.
#[derive(Clone)]
struct FakeIo {
    ops: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl FakeIo {
    fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_on: Arc::new(Mutex::new(None)),
        }
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn fail_on(&self, op: &str) {
        *self.fail_on.lock().unwrap_or_else(|e| e.into_inner()) = Some(op.to_string());
    }

    fn record(&self, op: &str) -> Result<(), SnapshotError> {
        self.ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(op.to_string());
        let fail = self.fail_on.lock().unwrap_or_else(|e| e.into_inner());
        if fail.as_deref() == Some(op) {
            return Err(SnapshotError::Compress(format!("injected failure at {op}")));
        }
        Ok(())
    }
}

impl SnapshotIo for FakeIo {
    fn write_tmp(&self, _path: &Path, _data: &[u8]) -> Result<(), SnapshotError> {
        self.record("write_tmp")
    }
    fn fsync_file(&self, _path: &Path) -> Result<(), SnapshotError> {
        self.record("fsync_file")
    }
    fn rename(&self, _from: &Path, _to: &Path) -> Result<(), SnapshotError> {
        self.record("rename")
    }
    fn fsync_dir(&self, _path: &Path) -> Result<(), SnapshotError> {
        self.record("fsync_dir")
    }
    fn file_size(&self, _path: &Path) -> Result<u64, SnapshotError> {
        self.record("file_size")?;
        Ok(128)
    }
}

#[test]
fn io_happens_in_durability_order() {
    let io = FakeIo::new();
    let snapshotter = Snapshotter::with_io(io.clone(), PathBuf::from("/tmp/snap/snapshot.zst"));
    let written = snapshotter
        .write_sync(7, &MaterializedState::default())
        .unwrap();

    assert_eq!(written.seq, 7);
    assert_eq!(
        io.ops(),
        vec!["write_tmp", "fsync_file", "rename", "fsync_dir", "file_size"]
    );
}

#[test]
fn rename_failure_stops_before_dir_fsync() {
    let io = FakeIo::new();
    io.fail_on("rename");
    let snapshotter = Snapshotter::with_io(io.clone(), PathBuf::from("/tmp/snap/snapshot.zst"));
    assert!(snapshotter
        .write_sync(7, &MaterializedState::default())
        .is_err());
    assert!(!io.ops().contains(&"fsync_dir".to_string()));
}

#[test]
fn background_start_completes_and_reports_seq() {
    let io = FakeIo::new();
    let snapshotter = Snapshotter::with_io(io, PathBuf::from("/tmp/snap/snapshot.zst"));
    let handle = snapshotter.start(11, &MaterializedState::default());
    let written = handle.wait().unwrap();
    assert_eq!(written.seq, 11);
}

#[test]
fn real_fs_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");
    let snapshotter = Snapshotter::new(path.clone());

    let mut state = MaterializedState::default();
    state.apply_event(&wf_core::test_support::project_created("p1"));
    snapshotter.write_sync(3, &state).unwrap();

    let loaded = Snapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 3);
    assert!(loaded.state.projects.contains_key("p1"));
    assert!(!path.with_extension("tmp").exists());
}
