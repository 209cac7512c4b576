// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number. Recovery loads the snapshot and
//! replays WAL entries after that sequence. Snapshots are zstd-compressed
//! JSON with a version field for forward migration.

use crate::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Bump when the snapshot layout changes; add a migration below.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// Errors from snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("snapshot version {0} is newer than this binary supports")]
    UnsupportedVersion(u32),
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// WAL sequence number at the time of the snapshot
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Self {
            version: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Serialize and compress (zstd level 3, speed over ratio).
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let json = serde_json::to_vec(self)?;
        zstd::encode_all(json.as_slice(), 3).map_err(|e| SnapshotError::Compress(e.to_string()))
    }

    /// Load a snapshot if one exists.
    ///
    /// Returns `Ok(None)` when the file is missing or corrupt; corrupt files
    /// rotate to `.bak` so the daemon can still recover via WAL replay.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let decoded: Result<Snapshot, SnapshotError> = (|| {
            let file = File::open(path)?;
            let decoder = zstd::stream::read::Decoder::new(file)
                .map_err(|e| SnapshotError::Compress(e.to_string()))?;
            let value: Value = serde_json::from_reader(decoder)?;
            let migrated = migrate(value)?;
            Ok(serde_json::from_value(migrated)?)
        })();

        match decoded {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(SnapshotError::UnsupportedVersion(v)) => {
                Err(SnapshotError::UnsupportedVersion(v))
            }
            Err(e) => {
                let bak = rotate_bak_path(path);
                warn!(
                    error = %e,
                    path = %path.display(),
                    bak = %bak.display(),
                    "corrupt snapshot, moving to .bak and recovering from WAL",
                );
                fs::rename(path, &bak)?;
                Ok(None)
            }
        }
    }
}

/// Bring an older snapshot document up to the current version.
fn migrate(mut value: Value) -> Result<Value, SnapshotError> {
    let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if version > CURRENT_SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    // Version 0 predates the version field itself; stamp it.
    if version == 0 {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("version".into(), Value::from(CURRENT_SNAPSHOT_VERSION));
        }
    }
    Ok(value)
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups; the oldest is removed when the
/// limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
