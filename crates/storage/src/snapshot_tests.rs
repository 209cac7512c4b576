// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write as _;

fn state_with_project() -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&wf_core::test_support::project_created("p1"));
    state
}

fn save(snapshot: &Snapshot, path: &Path) {
    let data = snapshot.encode().unwrap();
    let mut file = File::create(path).unwrap();
    file.write_all(&data).unwrap();
}

#[test]
fn encode_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");

    let snapshot = Snapshot::new(42, state_with_project());
    save(&snapshot, &path);

    let loaded = Snapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 42);
    assert_eq!(loaded.version, CURRENT_SNAPSHOT_VERSION);
    assert!(loaded.state.projects.contains_key("p1"));
}

#[test]
fn missing_snapshot_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = Snapshot::load(&dir.path().join("nope.zst")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn corrupt_snapshot_rotates_to_bak() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");
    std::fs::write(&path, b"definitely not zstd").unwrap();

    let loaded = Snapshot::load(&path).unwrap();
    assert!(loaded.is_none());
    assert!(!path.exists());
    assert!(path.with_extension("bak").exists());
}

#[test]
fn bak_rotation_keeps_a_bounded_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");

    for n in 0..5 {
        std::fs::write(&path, format!("garbage {n}")).unwrap();
        let _ = Snapshot::load(&path).unwrap();
    }

    let baks: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("bak"))
        .collect();
    assert!(baks.len() <= 3, "expected at most 3 baks, got {}", baks.len());
}

#[test]
fn newer_version_is_refused_not_rotated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.zst");

    let json = serde_json::json!({
        "version": CURRENT_SNAPSHOT_VERSION + 1,
        "seq": 1,
        "state": MaterializedState::default(),
        "created_at": chrono::Utc::now(),
    });
    let compressed = zstd::encode_all(serde_json::to_vec(&json).unwrap().as_slice(), 3).unwrap();
    std::fs::write(&path, compressed).unwrap();

    let err = Snapshot::load(&path).unwrap_err();
    assert!(matches!(err, SnapshotError::UnsupportedVersion(_)));
    // The file is left in place for a newer binary
    assert!(path.exists());
}
