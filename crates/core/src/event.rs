// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types for the worker plane.
//!
//! Events are facts about what happened; all durable state is derived from
//! them. Serializes with `{"type": "scope:name", ...fields}` format.
//! Unknown type tags deserialize to `Custom`.

use crate::build::BuildId;
use crate::checkpoint::BuildCheckpoint;
use crate::failure::FailureKind;
use crate::job::{JobId, QueueJob, Repeatable};
use crate::message::{Message, MessageId};
use crate::operation::OperationId;
use crate::project::{ProjectId, UserId};
use crate::session::SessionId;
use crate::version::{ChangeType, VersionId};
use serde::{Deserialize, Serialize};

/// Events that trigger state transitions in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- project --
    #[serde(rename = "project:created")]
    ProjectCreated {
        id: ProjectId,
        owner_id: UserId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        collaborators: Vec<UserId>,
        created_at_ms: u64,
    },

    #[serde(rename = "project:queued")]
    ProjectQueued { id: ProjectId, build_id: BuildId },

    #[serde(rename = "project:building")]
    ProjectBuilding {
        id: ProjectId,
        build_id: BuildId,
        started_at_ms: u64,
    },

    #[serde(rename = "project:deployed")]
    ProjectDeployed {
        id: ProjectId,
        build_id: BuildId,
        preview_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lane: Option<String>,
        completed_at_ms: u64,
    },

    #[serde(rename = "project:failed")]
    ProjectFailed {
        id: ProjectId,
        build_id: BuildId,
        completed_at_ms: u64,
    },

    #[serde(rename = "project:rolling-back")]
    ProjectRollingBack { id: ProjectId },

    #[serde(rename = "project:rollback-done")]
    ProjectRollbackDone { id: ProjectId },

    #[serde(rename = "project:rollback-failed")]
    ProjectRollbackFailed { id: ProjectId },

    #[serde(rename = "project:session-updated")]
    ProjectSessionUpdated {
        id: ProjectId,
        session_id: SessionId,
    },

    // -- build operations (idempotency) --
    #[serde(rename = "operation:recorded")]
    OperationRecorded {
        project_id: ProjectId,
        operation_id: OperationId,
        build_id: BuildId,
        version_id: VersionId,
        at_ms: u64,
    },

    #[serde(rename = "operation:job-patched")]
    OperationJobPatched {
        project_id: ProjectId,
        operation_id: OperationId,
        job_id: String,
    },

    // -- build --
    #[serde(rename = "build:created")]
    BuildCreated {
        id: BuildId,
        project_id: ProjectId,
        created_at_ms: u64,
    },

    #[serde(rename = "build:attempt-started")]
    BuildAttemptStarted { id: BuildId, attempt: u32, at_ms: u64 },

    #[serde(rename = "build:session-identified")]
    BuildSessionIdentified { id: BuildId, session_id: SessionId },

    #[serde(rename = "build:attempt-failed")]
    BuildAttemptFailed {
        id: BuildId,
        attempt: u32,
        kind: FailureKind,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_tail: Option<String>,
        at_ms: u64,
    },

    #[serde(rename = "build:ai-completed")]
    BuildAiCompleted { id: BuildId, completed_at_ms: u64 },

    #[serde(rename = "build:failed")]
    BuildFailed {
        id: BuildId,
        kind: FailureKind,
        error: String,
        completed_at_ms: u64,
    },

    #[serde(rename = "build:deployed")]
    BuildDeployed { id: BuildId, completed_at_ms: u64 },

    // -- version --
    #[serde(rename = "version:created")]
    VersionCreated {
        id: VersionId,
        project_id: ProjectId,
        build_id: BuildId,
        display_seq: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        created_at_ms: u64,
    },

    #[serde(rename = "version:semantics")]
    VersionSemanticsSet {
        version_id: VersionId,
        major: u32,
        minor: u32,
        patch: u32,
        change_type: ChangeType,
    },

    // -- checkpoint --
    #[serde(rename = "checkpoint:saved")]
    CheckpointSaved { checkpoint: BuildCheckpoint },

    // -- timeline --
    #[serde(rename = "message:appended")]
    MessageAppended { message: Message },

    #[serde(rename = "message:delivered")]
    MessageDelivered { id: MessageId },

    // -- metadata --
    #[serde(rename = "recommendations:recorded")]
    RecommendationsRecorded {
        project_id: ProjectId,
        build_id: BuildId,
        version_id: VersionId,
        payload: serde_json::Value,
    },

    // -- queue --
    #[serde(rename = "queue:job-enqueued")]
    JobEnqueued { job: QueueJob },

    #[serde(rename = "queue:job-started")]
    JobStarted {
        queue: String,
        job_id: JobId,
        attempt: u32,
        at_ms: u64,
    },

    #[serde(rename = "queue:job-completed")]
    JobCompleted { queue: String, job_id: JobId },

    /// `retry_at_ms: Some` re-enters waiting; `None` means retries are
    /// exhausted and the job is failed(final).
    #[serde(rename = "queue:job-failed")]
    JobFailed {
        queue: String,
        job_id: JobId,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<FailureKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_at_ms: Option<u64>,
    },

    /// Unrecoverable channel: the handler said retries are inappropriate.
    #[serde(rename = "queue:job-dead")]
    JobDead {
        queue: String,
        job_id: JobId,
        kind: FailureKind,
        error: String,
    },

    /// Job deferred without consuming an attempt (rollback window).
    /// `attempt` is the value to restore, making the handler idempotent.
    #[serde(rename = "queue:job-deferred")]
    JobDeferred {
        queue: String,
        job_id: JobId,
        run_at_ms: u64,
        attempt: u32,
    },

    #[serde(rename = "queue:paused")]
    QueuePaused {
        /// None pauses every queue.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
        reason: String,
    },

    #[serde(rename = "queue:resumed")]
    QueueResumed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },

    #[serde(rename = "queue:repeatable-added")]
    RepeatableAdded { repeatable: Repeatable },

    #[serde(rename = "queue:repeatable-fired")]
    RepeatableFired {
        queue: String,
        name: String,
        at_ms: u64,
    },

    // -- limit controller --
    #[serde(rename = "limit:tripped")]
    LimitTripped {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_at_ms: Option<u64>,
    },

    #[serde(rename = "limit:cleared")]
    LimitCleared,

    // -- accounting --
    #[serde(rename = "balance:granted")]
    BalanceGranted { user_id: UserId, seconds: i64 },

    #[serde(rename = "meter:started")]
    MeterStarted {
        build_id: BuildId,
        user_id: UserId,
        at_ms: u64,
    },

    #[serde(rename = "meter:ended")]
    MeterEnded {
        build_id: BuildId,
        at_ms: u64,
        charged_secs: i64,
        refunded: bool,
    },

    // -- security --
    #[serde(rename = "security:file-flagged")]
    SecurityFileFlagged { project_id: ProjectId, path: String },

    // -- runtime plumbing (not persisted to state) --
    #[serde(rename = "timer:fired")]
    TimerFired { id: String },

    #[serde(rename = "shutdown")]
    Shutdown,

    /// Unknown event type (forward compatibility during replay).
    #[serde(other)]
    Custom,
}

impl Event {
    /// Short human-readable summary for structured logs.
    pub fn log_summary(&self) -> String {
        match self {
            Event::ProjectCreated { id, .. } => format!("project:created {id}"),
            Event::ProjectQueued { id, build_id } => {
                format!("project:queued {id} build={build_id}")
            }
            Event::ProjectBuilding { id, .. } => format!("project:building {id}"),
            Event::ProjectDeployed { id, preview_url, .. } => {
                format!("project:deployed {id} url={preview_url}")
            }
            Event::ProjectFailed { id, .. } => format!("project:failed {id}"),
            Event::ProjectRollingBack { id } => format!("project:rolling-back {id}"),
            Event::ProjectRollbackDone { id } => format!("project:rollback-done {id}"),
            Event::ProjectRollbackFailed { id } => format!("project:rollback-failed {id}"),
            Event::ProjectSessionUpdated { id, .. } => format!("project:session-updated {id}"),
            Event::OperationRecorded {
                project_id,
                operation_id,
                ..
            } => format!("operation:recorded {project_id}/{operation_id}"),
            Event::OperationJobPatched {
                project_id,
                operation_id,
                ..
            } => format!("operation:job-patched {project_id}/{operation_id}"),
            Event::BuildCreated { id, .. } => format!("build:created {id}"),
            Event::BuildAttemptStarted { id, attempt, .. } => {
                format!("build:attempt-started {id} attempt={attempt}")
            }
            Event::BuildSessionIdentified { id, session_id } => {
                format!("build:session-identified {id} session={session_id}")
            }
            Event::BuildAttemptFailed {
                id, attempt, kind, ..
            } => format!("build:attempt-failed {id} attempt={attempt} kind={kind}"),
            Event::BuildAiCompleted { id, .. } => format!("build:ai-completed {id}"),
            Event::BuildFailed { id, kind, .. } => format!("build:failed {id} kind={kind}"),
            Event::BuildDeployed { id, .. } => format!("build:deployed {id}"),
            Event::VersionCreated {
                id, display_seq, ..
            } => format!("version:created {id} v{display_seq}"),
            Event::VersionSemanticsSet { version_id, .. } => {
                format!("version:semantics {version_id}")
            }
            Event::CheckpointSaved { checkpoint } => {
                format!("checkpoint:saved {}", checkpoint.build_id)
            }
            Event::MessageAppended { message } => {
                format!("message:appended {} seq={}", message.id, message.seq)
            }
            Event::MessageDelivered { id } => format!("message:delivered {id}"),
            Event::RecommendationsRecorded { build_id, .. } => {
                format!("recommendations:recorded {build_id}")
            }
            Event::JobEnqueued { job } => {
                format!("queue:job-enqueued {} on {}", job.id, job.queue)
            }
            Event::JobStarted {
                queue,
                job_id,
                attempt,
                ..
            } => format!("queue:job-started {job_id} on {queue} attempt={attempt}"),
            Event::JobCompleted { queue, job_id } => {
                format!("queue:job-completed {job_id} on {queue}")
            }
            Event::JobFailed {
                queue,
                job_id,
                retry_at_ms,
                ..
            } => format!(
                "queue:job-failed {job_id} on {queue} retry={}",
                retry_at_ms.is_some()
            ),
            Event::JobDead {
                queue,
                job_id,
                kind,
                ..
            } => format!("queue:job-dead {job_id} on {queue} kind={kind}"),
            Event::JobDeferred { queue, job_id, .. } => {
                format!("queue:job-deferred {job_id} on {queue}")
            }
            Event::QueuePaused { queue, reason } => format!(
                "queue:paused {} reason={reason}",
                queue.as_deref().unwrap_or("*")
            ),
            Event::QueueResumed { queue } => {
                format!("queue:resumed {}", queue.as_deref().unwrap_or("*"))
            }
            Event::RepeatableAdded { repeatable } => {
                format!("queue:repeatable-added {}", repeatable.identity())
            }
            Event::RepeatableFired { queue, name, .. } => {
                format!("queue:repeatable-fired repeat:{queue}:{name}")
            }
            Event::LimitTripped { reason, .. } => format!("limit:tripped {reason}"),
            Event::LimitCleared => "limit:cleared".to_string(),
            Event::BalanceGranted { user_id, seconds } => {
                format!("balance:granted {user_id} +{seconds}s")
            }
            Event::MeterStarted { build_id, .. } => format!("meter:started {build_id}"),
            Event::MeterEnded {
                build_id,
                charged_secs,
                refunded,
                ..
            } => format!("meter:ended {build_id} charged={charged_secs}s refunded={refunded}"),
            Event::SecurityFileFlagged { project_id, path } => {
                format!("security:file-flagged {project_id} {path}")
            }
            Event::TimerFired { id } => format!("timer:fired {id}"),
            Event::Shutdown => "shutdown".to_string(),
            Event::Custom => "custom".to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
