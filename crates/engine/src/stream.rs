// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage-one worker: supervise the code-generation agent and leave the
//! system in `ai_completed` on success.
//!
//! One job drives one `(project, build, attempt)` through: lifecycle
//! phase 1 (mark building, verified before the spawn), retry context and
//! template selection, pre-flight, accounting, supervised agent execution
//! with live progress fan-out, checkpointing, file-placement validation,
//! version creation, and the metadata/deploy handoff.

use crate::accounting::{Accountant, AccountingError};
use crate::config::{PipelineConfig, DEPLOY_QUEUE, METADATA_QUEUE};
use crate::deploy::DeployPayload;
use crate::limits::LimitController;
use crate::metadata::MetadataPayload;
use crate::placement;
use crate::prompts;
use crate::queue::{JobError, JobHandler, JobVerdict, QueueRuntime};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use wf_adapters::{AgentFailure, AgentInvocation, AgentOutcome, AgentRecord, BuildAgent};
use wf_bus::{Coalescer, DurablePublish, ProgressBus, SYSTEM_USER};
use wf_core::{
    ActorType, BuildCheckpoint, BuildId, BuildStatus, ChatMode, Clock, EnqueueOpts, Event,
    EventSink, FailureKind, JobId, MessageId, ProjectId, QueueJob, SessionId, UserId, VersionId,
};
use wf_storage::MaterializedState;

/// Re-check interval while a rollback is in flight.
const ROLLBACK_RECHECK: Duration = Duration::from_secs(15);

/// Cap on files collected when scanning a project directory.
const SCAN_CAP: usize = 500;

/// Payload of a stage-one queue job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPayload {
    pub project_id: ProjectId,
    pub build_id: BuildId,
    pub version_id: VersionId,
    pub user_id: UserId,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default)]
    pub is_initial_build: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    /// Set when the build was queued during a rollback window.
    #[serde(default)]
    pub delay_until_rollback_complete: bool,
}

/// Stage-one worker.
pub struct StreamWorker<A: BuildAgent, C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    agent: A,
    queue: QueueRuntime<C>,
    bus: Arc<ProgressBus<C>>,
    accountant: Arc<Accountant<C>>,
    limits: LimitController<C>,
    config: PipelineConfig,
}

impl<A: BuildAgent, C: Clock> StreamWorker<A, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        clock: C,
        agent: A,
        queue: QueueRuntime<C>,
        bus: Arc<ProgressBus<C>>,
        accountant: Arc<Accountant<C>>,
        limits: LimitController<C>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            state,
            sink,
            clock,
            agent,
            queue,
            bus,
            accountant,
            limits,
            config,
        }
    }

    fn project_status(&self, project_id: &ProjectId) -> Option<BuildStatus> {
        self.state
            .lock()
            .get_project(project_id.as_str())
            .and_then(|p| p.build_status)
    }

    async fn run_attempt(
        &self,
        payload: &StreamPayload,
        attempt: u32,
    ) -> Result<AgentOutcome, JobError> {
        let project_path = self
            .config
            .project_path(&payload.user_id, &payload.project_id);
        let now = self.clock.epoch_ms();

        // 1. Lifecycle phase 1: mark building, verify by read-back, and
        //    only then spawn. A failed verify aborts the attempt.
        self.sink
            .record(Event::ProjectBuilding {
                id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                started_at_ms: now,
            })
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        if self.project_status(&payload.project_id) != Some(BuildStatus::Building) {
            return Err(JobError::new(
                FailureKind::AgentError,
                format!("project {} is not building after write", payload.project_id),
            ));
        }

        // 2. Working directory, hidden metadata directory, ignore entry
        let hidden = project_path.join(&self.config.hidden_dir);
        std::fs::create_dir_all(&hidden)
            .map_err(|e| JobError::new(FailureKind::SystemConfigError, e.to_string()))?;
        ensure_ignore_entry(&project_path, &self.config.hidden_dir)
            .map_err(|e| JobError::new(FailureKind::SystemConfigError, e.to_string()))?;

        // 3. Retry context: checkpoint, else a directory scan
        let checkpoint = self
            .state
            .lock()
            .checkpoint(payload.build_id.as_str())
            .cloned();
        let files = match (&checkpoint, attempt) {
            (Some(cp), n) if n > 1 => cp.files_before.clone(),
            _ => scan_project_files(&project_path, &self.config.hidden_dir),
        };
        let has_files = !files.is_empty();
        let prev_error = if attempt > 1 {
            self.state
                .lock()
                .get_build(payload.build_id.as_str())
                .and_then(|b| b.last_error.clone())
        } else {
            None
        };
        let template = prompts::select(payload.is_initial_build, attempt, has_files);
        let prompt = prompts::render(template, &payload.prompt, &files, prev_error.as_deref());
        info!(
            build_id = %payload.build_id,
            attempt,
            template = %template,
            has_files,
            "attempt prepared"
        );

        // 4. Pre-flight: binary, then the global limit
        self.agent.preflight(&project_path).await.map_err(|e| {
            JobError::new(FailureKind::SystemConfigError, e.to_string())
        })?;
        if let Some(limit) = self.limits.active() {
            return Err(JobError::new(
                FailureKind::UsageLimitExceeded {
                    reset_at_ms: limit.reset_at_ms,
                },
                "upstream usage limit is active",
            ));
        }

        // 5. Accounting pre-flight + meter start
        self.accountant
            .begin(&payload.build_id, &payload.user_id)
            .map_err(|e| match e {
                AccountingError::InsufficientBalance { .. } => {
                    JobError::new(FailureKind::InsufficientBalance, e.to_string())
                }
                AccountingError::Sink(e) => JobError::new(FailureKind::AgentError, e.to_string()),
            })?;

        self.sink
            .record(Event::BuildAttemptStarted {
                id: payload.build_id.clone(),
                attempt,
                at_ms: self.clock.epoch_ms(),
            })
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;

        // 6/7. Supervise the agent; resume when continuation context exists
        let resume_session = checkpoint
            .as_ref()
            .and_then(|cp| cp.session_id.clone())
            .or_else(|| {
                (!payload.is_initial_build)
                    .then(|| payload.previous_session_id.clone())
                    .flatten()
            });
        let (progress_tx, progress_task) = self.spawn_progress_forwarder(&payload.project_id);
        let invocation = AgentInvocation {
            prompt,
            cwd: project_path.clone(),
            env: Vec::new(),
            resume_session,
            deadline: self.config.attempt_deadline(attempt, has_files),
        };
        let run_result = self.agent.run(invocation, Some(progress_tx)).await;
        let _ = progress_task.await;

        let outcome =
            run_result.map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        info!(
            build_id = %payload.build_id,
            session_state = %outcome.session_state(),
            resumed = outcome.resumed,
            duration_ms = outcome.duration_ms,
            "agent attempt finished"
        );

        // The first id-bearing record patches the build's session
        if let Some(session_id) = &outcome.session_id {
            let _ = self.sink.record(Event::BuildSessionIdentified {
                id: payload.build_id.clone(),
                session_id: session_id.clone(),
            });
        }

        // 8. Checkpoint on orderly termination (success or not): the next
        //    attempt resumes from here
        let _ = self.sink.record(Event::CheckpointSaved {
            checkpoint: BuildCheckpoint {
                build_id: payload.build_id.clone(),
                session_id: outcome.session_id.clone(),
                files_before: files,
                input_tokens: outcome.input_tokens,
                output_tokens: outcome.output_tokens,
                cost_usd: outcome.cost_usd,
                attempt,
                saved_at_ms: self.clock.epoch_ms(),
            },
        });

        if !outcome.success {
            return Err(self.classify_failure(payload, attempt, &outcome));
        }

        self.commit_success(payload, &project_path, &outcome)?;
        Ok(outcome)
    }

    /// Map an unsuccessful outcome into the failure taxonomy, recording the
    /// attempt failure (with stderr) for the next attempt's prompt context.
    fn classify_failure(
        &self,
        payload: &StreamPayload,
        attempt: u32,
        outcome: &AgentOutcome,
    ) -> JobError {
        let (kind, message) = match &outcome.error {
            Some(AgentFailure::TimedOut { deadline_secs }) => (
                FailureKind::AgentTimeout,
                format!("attempt timed out after {deadline_secs}s"),
            ),
            Some(AgentFailure::BinaryMissing) => (
                FailureKind::SystemConfigError,
                "agent binary missing".to_string(),
            ),
            Some(AgentFailure::PermissionDenied) => (
                FailureKind::SystemConfigError,
                "agent binary not executable".to_string(),
            ),
            Some(AgentFailure::Failed { message, .. }) => {
                let lower = message.to_lowercase();
                if lower.contains("usage limit") || lower.contains("rate limit") {
                    (
                        FailureKind::UsageLimitExceeded { reset_at_ms: None },
                        message.clone(),
                    )
                } else {
                    (FailureKind::AgentError, message.clone())
                }
            }
            None => (
                FailureKind::AgentError,
                "agent reported failure".to_string(),
            ),
        };

        let _ = self.sink.record(Event::BuildAttemptFailed {
            id: payload.build_id.clone(),
            attempt,
            kind: kind.clone(),
            error: message.clone(),
            stderr_tail: (!outcome.stderr_tail.is_empty())
                .then(|| outcome.stderr_tail.clone()),
            at_ms: self.clock.epoch_ms(),
        });

        JobError::new(kind, message)
    }

    /// Steps 9–11: placement sweep, version + `ai_completed`, durable
    /// completion message, metadata/deploy handoff (or the mock bypass).
    fn commit_success(
        &self,
        payload: &StreamPayload,
        project_path: &Path,
        outcome: &AgentOutcome,
    ) -> Result<(), JobError> {
        let fail = |e: &dyn std::fmt::Display| {
            JobError::new(FailureKind::AgentError, e.to_string())
        };
        let now = self.clock.epoch_ms();

        self.accountant
            .end(&payload.build_id, true)
            .map_err(|e| fail(&e))?;

        // 9. Project-class files that escaped the project directory
        if let Some(base_dir) = project_path.parent() {
            match placement::sweep_strays(base_dir, project_path) {
                Ok(report) => {
                    for flagged in &report.flagged {
                        let _ = self.sink.record(Event::SecurityFileFlagged {
                            project_id: payload.project_id.clone(),
                            path: flagged.display().to_string(),
                        });
                    }
                }
                Err(e) => warn!(error = %e, "placement sweep failed (continuing)"),
            }
        }

        // 10. Version creation is coupled to successful agent completion;
        //     this is the first and only place a Version row is minted
        let display_seq = self
            .state
            .lock()
            .get_project(payload.project_id.as_str())
            .map(|p| p.version_counter + 1)
            .unwrap_or(1);
        self.sink
            .record(Event::VersionCreated {
                id: payload.version_id.clone(),
                project_id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                display_seq,
                session_id: outcome.session_id.clone(),
                created_at_ms: now,
            })
            .map_err(|e| fail(&e))?;
        self.sink
            .record(Event::BuildAiCompleted {
                id: payload.build_id.clone(),
                completed_at_ms: self.clock.epoch_ms(),
            })
            .map_err(|e| fail(&e))?;
        if let Some(session_id) = &outcome.session_id {
            let _ = self.sink.record(Event::ProjectSessionUpdated {
                id: payload.project_id.clone(),
                session_id: session_id.clone(),
            });
        }

        if let Err(e) = self.bus.publish_durable(DurablePublish {
            project_id: payload.project_id.clone(),
            user_id: SYSTEM_USER.into(),
            actor: ActorType::Assistant,
            mode: ChatMode::Build,
            parent_message_id: payload.parent_message_id.clone(),
            build_id: Some(payload.build_id.clone()),
            body: "BUILD_DEVELOPMENT_COMPLETE".into(),
            response: Some(serde_json::json!({
                "type": "BUILD_DEVELOPMENT_COMPLETE",
                "buildId": payload.build_id.as_str(),
                "versionId": payload.version_id.as_str(),
                "filesWritten": outcome.files_written,
            })),
        }) {
            warn!(error = %e, "failed to publish completion message (continuing)");
        }

        // Mock bypass: strictly pattern-gated test affordance. Skips the
        // deploy handoff and records a static preview URL.
        let is_mock = outcome
            .session_id
            .as_ref()
            .is_some_and(|s| s.as_str().starts_with(&self.config.mock_session_prefix));
        if is_mock {
            warn!(build_id = %payload.build_id, "mock session detected, bypassing deploy");
            let _ = self.sink.record(Event::ProjectDeployed {
                id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                preview_url: self.config.mock_preview_url.clone(),
                lane: None,
                completed_at_ms: self.clock.epoch_ms(),
            });
            let _ = self.sink.record(Event::BuildDeployed {
                id: payload.build_id.clone(),
                completed_at_ms: self.clock.epoch_ms(),
            });
        }

        // 11. Handoff
        let metadata = MetadataPayload {
            project_id: payload.project_id.clone(),
            build_id: payload.build_id.clone(),
            version_id: payload.version_id.clone(),
            user_id: payload.user_id.clone(),
            session_id: outcome.session_id.clone(),
            is_initial_build: payload.is_initial_build,
        };
        self.queue
            .enqueue(
                METADATA_QUEUE,
                "metadata",
                serde_json::to_value(&metadata).map_err(|e| fail(&e))?,
                EnqueueOpts::default(),
                JobId::new(format!("metadata:{}", payload.build_id)),
            )
            .map_err(|e| fail(&e))?;

        if !is_mock {
            let deploy = DeployPayload {
                project_id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                version_id: payload.version_id.clone(),
                project_path: project_path.to_path_buf(),
            };
            self.queue
                .enqueue(
                    DEPLOY_QUEUE,
                    "deploy",
                    serde_json::to_value(&deploy).map_err(|e| fail(&e))?,
                    EnqueueOpts::default(),
                    JobId::new(format!("deploy:{}", payload.build_id)),
                )
                .map_err(|e| fail(&e))?;
        }

        info!(build_id = %payload.build_id, "ai stage complete");
        Ok(())
    }

    /// Failure bookkeeping shared by every attempt: settle the meter, trip
    /// the limit controller for pause-worthy kinds, and on terminal
    /// failure mark the project failed with one timeline message.
    fn handle_failure(&self, payload: &StreamPayload, job: &QueueJob, error: &JobError) {
        let _ = self.accountant.end(&payload.build_id, false);
        match self.limits.observe(&error.kind) {
            Ok(true) => info!(kind = %error.kind, "limit controller tripped"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "limit controller observe failed"),
        }

        let terminal = error.unrecoverable() || job.attempt >= job.max_attempts;
        if !terminal {
            let mut progress = serde_json::Map::new();
            progress.insert("attempt".into(), serde_json::Value::from(job.attempt));
            progress.insert(
                "error_type".into(),
                serde_json::Value::from(error.kind.as_str()),
            );
            self.bus.publish_ephemeral(
                &payload.project_id,
                "build.attempt_failed",
                SYSTEM_USER,
                progress,
            );
            return;
        }

        let now = self.clock.epoch_ms();
        let _ = self.sink.record(Event::BuildFailed {
            id: payload.build_id.clone(),
            kind: error.kind.clone(),
            error: error.message.clone(),
            completed_at_ms: now,
        });
        let _ = self.sink.record(Event::ProjectFailed {
            id: payload.project_id.clone(),
            build_id: payload.build_id.clone(),
            completed_at_ms: now,
        });

        let duration_ms = self
            .state
            .lock()
            .get_build(payload.build_id.as_str())
            .and_then(|b| b.started_at_ms)
            .map(|started| now.saturating_sub(started))
            .unwrap_or(0);
        if let Err(e) = self.bus.publish_durable(DurablePublish {
            project_id: payload.project_id.clone(),
            user_id: SYSTEM_USER.into(),
            actor: ActorType::Assistant,
            mode: ChatMode::Build,
            parent_message_id: payload.parent_message_id.clone(),
            build_id: Some(payload.build_id.clone()),
            body: "build_failed".into(),
            response: Some(serde_json::json!({
                "type": "build_failed",
                "error_type": error.kind.as_str(),
                "message": error.message,
                "duration": duration_ms,
                "attempt": job.attempt,
            })),
        }) {
            warn!(error = %e, "failed to publish build_failed message");
        }
    }

    /// Forward agent records to the project channel as coalesced
    /// `build.progress` events (≤1/s, last write wins, flushed at end).
    fn spawn_progress_forwarder(
        &self,
        project_id: &ProjectId,
    ) -> (mpsc::Sender<AgentRecord>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AgentRecord>(64);
        let bus = Arc::clone(&self.bus);
        let project_id = project_id.clone();

        let task = tokio::spawn(async move {
            let mut coalescer = Coalescer::per_second();
            loop {
                tokio::select! {
                    record = rx.recv() => match record {
                        Some(record) => {
                            if let Some(out) = coalescer.offer(record_payload(&record), Instant::now()) {
                                bus.publish_ephemeral(&project_id, "build.progress", SYSTEM_USER, out);
                            }
                        }
                        None => {
                            if let Some(out) = coalescer.flush(Instant::now()) {
                                bus.publish_ephemeral(&project_id, "build.progress", SYSTEM_USER, out);
                            }
                            break;
                        }
                    },
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {
                        if let Some(out) = coalescer.poll(Instant::now()) {
                            bus.publish_ephemeral(&project_id, "build.progress", SYSTEM_USER, out);
                        }
                    }
                }
            }
        });
        (tx, task)
    }
}

fn record_payload(record: &AgentRecord) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Append the hidden metadata directory to the project's ignore file.
fn ensure_ignore_entry(project_path: &Path, hidden_dir: &str) -> std::io::Result<()> {
    let ignore = project_path.join(".gitignore");
    let entry = format!("{hidden_dir}/");
    let current = std::fs::read_to_string(&ignore).unwrap_or_default();
    if current.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }
    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated.push('\n');
    std::fs::write(&ignore, updated)
}

/// Relative paths of files already in the project (hidden dir excluded).
fn scan_project_files(project_path: &Path, hidden_dir: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut stack = vec![project_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if files.len() >= SCAN_CAP {
                return files;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == hidden_dir || name == ".git" || name == ".gitignore" {
                continue;
            }
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => stack.push(path),
                Ok(ft) if ft.is_file() => {
                    if let Ok(rel) = path.strip_prefix(project_path) {
                        files.push(rel.to_string_lossy().into_owned());
                    }
                }
                _ => {}
            }
        }
    }
    files.sort_unstable();
    files
}

#[async_trait]
impl<A: BuildAgent, C: Clock> JobHandler for StreamWorker<A, C> {
    async fn run(&self, job: QueueJob) -> Result<JobVerdict, JobError> {
        let payload: StreamPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::new(FailureKind::ValidationError, e.to_string()))?;

        // Rollback window: defer without consuming an attempt; a failed
        // rollback terminally cancels deferred work.
        match self.project_status(&payload.project_id) {
            Some(BuildStatus::RollingBack) => {
                info!(project_id = %payload.project_id, "rollback in flight, deferring");
                return Ok(JobVerdict::Deferred {
                    delay: ROLLBACK_RECHECK,
                });
            }
            Some(BuildStatus::RollbackFailed) if payload.delay_until_rollback_complete => {
                return Err(JobError::new(
                    FailureKind::Canceled,
                    "rollback failed while this build was queued",
                ));
            }
            _ => {}
        }

        match self.run_attempt(&payload, job.attempt).await {
            Ok(_) => Ok(JobVerdict::Completed),
            Err(error) => {
                self.handle_failure(&payload, &job, &error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
