// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project identifier and build lifecycle state machine.

use crate::build::BuildId;
use crate::session::SessionId;
use crate::version::VersionId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Stable identifier for a project.
    ///
    /// Projects are created outside the worker plane; the pipeline only
    /// transitions their build lifecycle.
    pub struct ProjectId;
}

crate::define_id! {
    /// Identifier of a platform user (owner or collaborator).
    pub struct UserId;
}

/// Build lifecycle status of a project.
///
/// Transitions are owned by the BuildInitiator and the stage workers; the
/// storage layer rejects transitions not permitted by
/// [`BuildStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    Queued,
    Building,
    Deployed,
    Failed,
    Canceled,
    Superseded,
    RollingBack,
    RollbackFailed,
}

impl BuildStatus {
    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Any state may re-enter `queued`: a new build supersedes whatever
    /// came before, and work queued during a rollback window defers itself
    /// at dispatch time rather than being refused here.
    pub fn can_transition_to(self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Queued) => true,
            (RollingBack, Deployed | RollbackFailed | Canceled) => true,
            (RollingBack, _) => false,
            (Queued, Building | Failed | Canceled | Superseded) => true,
            (Building, Deployed | Failed | Canceled) => true,
            (Deployed, RollingBack | Superseded) => true,
            (RollbackFailed, RollingBack) => true,
            _ => false,
        }
    }

    /// Terminal from the pipeline's point of view (no worker will advance it
    /// without a new initiation).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Deployed
                | BuildStatus::Failed
                | BuildStatus::Canceled
                | BuildStatus::Superseded
                | BuildStatus::RollbackFailed
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Queued => write!(f, "queued"),
            BuildStatus::Building => write!(f, "building"),
            BuildStatus::Deployed => write!(f, "deployed"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Canceled => write!(f, "canceled"),
            BuildStatus::Superseded => write!(f, "superseded"),
            BuildStatus::RollingBack => write!(f, "rollingBack"),
            BuildStatus::RollbackFailed => write!(f, "rollbackFailed"),
        }
    }
}

/// A project as seen by the worker plane.
///
/// Owns zero-or-one current build and zero-or-one current version. The row
/// is the central serialization point for lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: UserId,
    #[serde(default)]
    pub collaborators: Vec<UserId>,
    /// None until the first build is initiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_status: Option<BuildStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_build_id: Option<BuildId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<VersionId>,
    /// Last agent session id, kept for contextual continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_id: Option<SessionId>,
    /// Monotonic display counter backing version names (`v1`, `v2`, …).
    #[serde(default)]
    pub version_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build_started_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build_completed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub created_at_ms: u64,
}

impl Project {
    pub fn new(id: ProjectId, owner_id: UserId, created_at_ms: u64) -> Self {
        Self {
            id,
            owner_id,
            collaborators: Vec::new(),
            build_status: None,
            current_build_id: None,
            current_version_id: None,
            last_session_id: None,
            version_counter: 0,
            last_build_started_ms: None,
            last_build_completed_ms: None,
            preview_url: None,
            created_at_ms,
        }
    }

    /// Whether the given user may initiate builds on this project.
    pub fn is_member(&self, user: &UserId) -> bool {
        self.owner_id == *user || self.collaborators.contains(user)
    }

    /// Apply a status transition if the state machine allows it.
    ///
    /// Returns false (leaving the row untouched) for illegal transitions so
    /// callers can surface the conflict instead of corrupting the lifecycle.
    pub fn transition(&mut self, next: BuildStatus) -> bool {
        match self.build_status {
            Some(current) if !current.can_transition_to(next) => false,
            _ => {
                self.build_status = Some(next);
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
