// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build initiation: deterministic ids, operation idempotency, first
//! lifecycle transition, stage-one enqueue.

use crate::config::{PipelineConfig, STAGE_ONE_QUEUE};
use crate::error::RuntimeError;
use crate::queue::QueueRuntime;
use crate::stream::StreamPayload;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use wf_bus::{DurablePublish, ProgressBus, SYSTEM_USER};
use wf_core::{
    ActorType, BuildId, BuildStatus, ChatMode, Clock, EnqueueOpts, Event, EventSink, IdGen, JobId,
    MessageId, OperationId, ProjectId, SessionId, UlidIdGen, UserId, VersionId,
};
use wf_storage::MaterializedState;

/// Request to start a build (pre-authenticated by the boundary).
#[derive(Debug, Clone)]
pub struct InitiateOptions {
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub prompt: String,
    pub framework: Option<String>,
    pub is_initial_build: bool,
    pub base_version_id: Option<VersionId>,
    pub previous_session_id: Option<SessionId>,
    /// Request origin tag (`web`, `api`, …). Informational.
    pub source: Option<String>,
    /// Idempotency key. Retries with the same key converge on one build.
    pub operation_id: Option<OperationId>,
    /// Tracing id. Independent of the idempotency key.
    pub correlation_id: Option<String>,
    /// Timeline parent for the eventual assistant reply.
    pub parent_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiateStatus {
    Queued,
    QueueFailed,
}

impl std::fmt::Display for InitiateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitiateStatus::Queued => write!(f, "queued"),
            InitiateStatus::QueueFailed => write!(f, "queue_failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub build_id: BuildId,
    pub version_id: VersionId,
    /// Empty when the first call has not completed enqueue yet.
    pub job_id: String,
    pub status: InitiateStatus,
    pub project_path: PathBuf,
    pub error: Option<String>,
}

/// Translates a request into a deterministic `(buildId, versionId, jobId)`
/// triple and enqueues stage one.
pub struct BuildInitiator<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    queue: QueueRuntime<C>,
    bus: Arc<ProgressBus<C>>,
    config: PipelineConfig,
    ids: UlidIdGen,
    /// Plays the unique-index role for `(projectId, operationId)` within
    /// this process: check-then-record must be atomic.
    ops_lock: Mutex<()>,
}

impl<C: Clock> BuildInitiator<C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        clock: C,
        queue: QueueRuntime<C>,
        bus: Arc<ProgressBus<C>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            state,
            sink,
            clock,
            queue,
            bus,
            config,
            ids: UlidIdGen,
            ops_lock: Mutex::new(()),
        }
    }

    /// Idempotent under `operation_id`, strict on the first lifecycle
    /// write, and `queue_failed` status (not an error) when the enqueue
    /// itself fails.
    pub fn initiate(&self, opts: InitiateOptions) -> Result<InitiateOutcome, RuntimeError> {
        let span = tracing::info_span!(
            "initiate",
            project_id = %opts.project_id,
            correlation_id = opts.correlation_id.as_deref().unwrap_or(""),
        );
        let _guard = span.enter();

        // Pre-conditions: the row exists and the caller is a member.
        // Absence is a fatal input error, not a retryable one.
        let (delay_until_rollback_complete, project_path) = {
            let state = self.state.lock();
            let project = state
                .get_project(opts.project_id.as_str())
                .ok_or_else(|| RuntimeError::ProjectNotFound(opts.project_id.to_string()))?;
            if !project.is_member(&opts.user_id) {
                return Err(RuntimeError::AccessDenied {
                    user: opts.user_id.to_string(),
                    project: opts.project_id.to_string(),
                });
            }
            (
                project.build_status == Some(BuildStatus::RollingBack),
                self.config.project_path(&opts.user_id, &opts.project_id),
            )
        };

        // 1. Resolve deterministic ids (conflict-do-nothing on the
        //    operation row; a duplicate call gets the original mapping).
        let ops_guard = self.ops_lock.lock();
        if let Some(operation_id) = &opts.operation_id {
            let existing = {
                let state = self.state.lock();
                state
                    .operation(opts.project_id.as_str(), operation_id.as_str())
                    .cloned()
            };
            if let Some(op) = existing {
                info!(operation_id = %operation_id, build_id = %op.build_id, "duplicate operation, returning original mapping");
                return Ok(InitiateOutcome {
                    build_id: op.build_id,
                    version_id: op.version_id,
                    job_id: op.job_id.unwrap_or_default(),
                    status: InitiateStatus::Queued,
                    project_path,
                    error: None,
                });
            }
        }

        let build_id = BuildId::new(self.ids.next());
        let version_id = VersionId::new(self.ids.next());
        let now = self.clock.epoch_ms();

        self.sink
            .record(Event::BuildCreated {
                id: build_id.clone(),
                project_id: opts.project_id.clone(),
                created_at_ms: now,
            })
            .map_err(|e| self.tracking_failure(&opts, e))?;

        if let Some(operation_id) = &opts.operation_id {
            // 2. Proceeding with a fresh non-deterministic buildId after a
            //    failed insert would silently break idempotency: abort.
            self.sink
                .record(Event::OperationRecorded {
                    project_id: opts.project_id.clone(),
                    operation_id: operation_id.clone(),
                    build_id: build_id.clone(),
                    version_id: version_id.clone(),
                    at_ms: now,
                })
                .map_err(|e| RuntimeError::OperationTrackingFailed(e.to_string()))?;
        }
        drop(ops_guard);

        // 3. Project → queued, verified by read-back. Strict.
        self.sink
            .record(Event::ProjectQueued {
                id: opts.project_id.clone(),
                build_id: build_id.clone(),
            })
            .map_err(|e| RuntimeError::StatusWriteFailed(e.to_string()))?;
        {
            let state = self.state.lock();
            let verified = state.get_project(opts.project_id.as_str()).is_some_and(|p| {
                p.build_status == Some(BuildStatus::Queued)
                    && p.current_build_id.as_ref() == Some(&build_id)
            });
            if !verified {
                return Err(RuntimeError::StatusWriteFailed(format!(
                    "project {} did not reach queued with build {}",
                    opts.project_id, build_id
                )));
            }
        }

        // Durable timeline marker for the initiation
        if let Err(e) = self.bus.publish_durable(DurablePublish {
            project_id: opts.project_id.clone(),
            user_id: SYSTEM_USER.into(),
            actor: ActorType::System,
            mode: ChatMode::Build,
            parent_message_id: opts.parent_message_id.clone(),
            build_id: Some(build_id.clone()),
            body: "build_initiated".into(),
            response: Some(serde_json::json!({
                "type": "build_initiated",
                "buildId": build_id.as_str(),
                "versionId": version_id.as_str(),
            })),
        }) {
            warn!(error = %e, "failed to publish build_initiated (continuing)");
        }

        // 4. Stage-one enqueue with a deterministic job id
        let job_key = opts
            .operation_id
            .as_ref()
            .map(|op| op.to_string())
            .unwrap_or_else(|| build_id.to_string());
        let job_id = format!("build:{}:{}", opts.project_id, job_key);
        let payload = StreamPayload {
            project_id: opts.project_id.clone(),
            build_id: build_id.clone(),
            version_id: version_id.clone(),
            user_id: opts.user_id.clone(),
            prompt: opts.prompt.clone(),
            framework: opts.framework.clone(),
            is_initial_build: opts.is_initial_build,
            base_version_id: opts.base_version_id.clone(),
            previous_session_id: opts.previous_session_id.clone(),
            parent_message_id: opts.parent_message_id.clone(),
            delay_until_rollback_complete,
        };
        let enqueue_result = serde_json::to_value(&payload)
            .map_err(RuntimeError::from)
            .and_then(|value| {
                self.queue.enqueue(
                    STAGE_ONE_QUEUE,
                    "build",
                    value,
                    EnqueueOpts {
                        attempts: 3,
                        backoff_base_ms: 1_000,
                        remove_on_complete: 1_000,
                        remove_on_fail: 2_000,
                        ..EnqueueOpts::default()
                    },
                    JobId::new(job_id.clone()),
                )
            });

        if let Err(e) = enqueue_result {
            warn!(error = %e, "stage-one enqueue failed, failing the project");
            let _ = self.sink.record(Event::ProjectFailed {
                id: opts.project_id.clone(),
                build_id: build_id.clone(),
                completed_at_ms: self.clock.epoch_ms(),
            });
            return Ok(InitiateOutcome {
                build_id,
                version_id,
                job_id: String::new(),
                status: InitiateStatus::QueueFailed,
                project_path,
                error: Some(e.to_string()),
            });
        }

        // 5. Patch the operation's job id. Non-fatal: the stage-one worker
        //    can still find the build by id.
        if let Some(operation_id) = &opts.operation_id {
            if let Err(e) = self.sink.record(Event::OperationJobPatched {
                project_id: opts.project_id.clone(),
                operation_id: operation_id.clone(),
                job_id: job_id.clone(),
            }) {
                warn!(error = %e, "failed to patch operation job id (continuing)");
            }
        }

        info!(build_id = %build_id, job_id, "build queued");
        Ok(InitiateOutcome {
            build_id,
            version_id,
            job_id,
            status: InitiateStatus::Queued,
            project_path,
            error: None,
        })
    }

    fn tracking_failure(&self, opts: &InitiateOptions, e: wf_core::SinkError) -> RuntimeError {
        if opts.operation_id.is_some() {
            RuntimeError::OperationTrackingFailed(e.to_string())
        } else {
            RuntimeError::Sink(e)
        }
    }
}

#[cfg(test)]
#[path = "initiator_tests.rs"]
mod tests;
