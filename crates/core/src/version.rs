// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version records: named snapshots produced by successful agent runs.

use crate::build::BuildId;
use crate::project::ProjectId;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a version (ULID).
    pub struct VersionId;
}

/// Semantic change class assigned by the metadata stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Major => write!(f, "major"),
            ChangeType::Minor => write!(f, "minor"),
            ChangeType::Patch => write!(f, "patch"),
        }
    }
}

/// A persisted, named snapshot of the project's files.
///
/// Created only on successful agent completion. Never speculatively, and
/// never for a failed build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub project_id: ProjectId,
    pub build_id: BuildId,
    /// Human-readable display name (`v1`, `v2`, …). Once set, the metadata
    /// stage must not overwrite it with a semantic label.
    pub display_name: String,
    /// Monotonic per-project display counter backing `display_name`.
    pub display_seq: u32,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    /// Agent session that produced this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub created_at_ms: u64,
}

impl Version {
    pub fn new(
        id: VersionId,
        project_id: ProjectId,
        build_id: BuildId,
        display_seq: u32,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            project_id,
            build_id,
            display_name: format!("v{display_seq}"),
            display_seq,
            major: 0,
            minor: 0,
            patch: 0,
            change_type: None,
            session_id: None,
            created_at_ms,
        }
    }

    /// Store semantic labeling from the metadata stage.
    ///
    /// The `vN` display name is deliberately left alone.
    pub fn set_semantics(&mut self, major: u32, minor: u32, patch: u32, change: ChangeType) {
        self.major = major;
        self.minor = minor;
        self.patch = patch;
        self.change_type = Some(change);
    }

    pub fn semver(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
