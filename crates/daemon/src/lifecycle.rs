// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: recovery, wiring, request dispatch, shutdown.
//!
//! Boot order: load the snapshot, replay WAL entries after it, construct
//! the shared sink, wire the pipeline (queue runtime, progress bus, limit
//! controller, accounting, stage workers, initiator), re-arm the limit
//! watcher, and start the maintenance loop that drives group commit and
//! snapshot cadence.

use crate::event_bus::{EventBus, EventReader};
use crate::protocol::{HealthEnvelope, HealthStatus, Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wf_adapters::{BuildAgent, Publisher};
use wf_bus::{DurablePublish, ProgressBus, Subscription};
use wf_core::{
    ActorType, BuildId, ChatMode, Clock, Event, EventSink, OperationId, ProjectId, SessionId,
    SystemClock, UserId, VersionId,
};
use wf_engine::{
    apply_deploy_callback, Accountant, BuildInitiator, DeployPayload, DeployWorker,
    InitiateOptions, LimitController, MetadataWorker, PipelineConfig, QueueRuntime, RuntimeError,
    StreamWorker, WorkerOpts, DEPLOY_QUEUE, METADATA_QUEUE, STAGE_ONE_QUEUE,
};
use wf_storage::{MaterializedState, Snapshot, Snapshotter, Wal};

/// Snapshot after this many processed events.
const SNAPSHOT_EVERY: u64 = 256;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("WAL error: {0}")]
    Wal(#[from] wf_storage::WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] wf_storage::SnapshotError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("kv error: {0}")]
    Kv(#[from] wf_adapters::KvError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// TTL of the rollback lease; renewed at half-TTL while held.
const ROLLBACK_LEASE_TTL: std::time::Duration = std::time::Duration::from_secs(30);

/// On-disk layout of the daemon's state directory.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub state_dir: PathBuf,
}

impl DaemonPaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn wal(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }

    pub fn snapshot(&self) -> PathBuf {
        self.state_dir.join("snapshot.zst")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("daemon.lock")
    }
}

/// The assembled worker plane.
pub struct Daemon<P: Publisher> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    event_bus: EventBus,
    queue: QueueRuntime<SystemClock>,
    progress: Arc<ProgressBus<SystemClock>>,
    limits: LimitController<SystemClock>,
    initiator: BuildInitiator<SystemClock>,
    accountant: Arc<Accountant<SystemClock>>,
    deploy: Arc<DeployWorker<P, SystemClock>>,
    /// Rollback leases (and, at the HTTP boundary, throttle counters).
    kv: Arc<wf_adapters::MemoryKv>,
    config: PipelineConfig,
    paths: DaemonPaths,
    _maintenance: JoinHandle<()>,
}

impl<P: Publisher> Daemon<P> {
    /// Recover state and bring the pipeline up.
    pub fn start<A: BuildAgent>(
        paths: DaemonPaths,
        config: PipelineConfig,
        agent: A,
        publisher: P,
    ) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(&paths.state_dir)?;

        // Recovery: snapshot, then replay everything after it
        let (snapshot_seq, mut recovered) = match Snapshot::load(&paths.snapshot())? {
            Some(snapshot) => (snapshot.seq, snapshot.state),
            None => (0, MaterializedState::default()),
        };
        let mut wal = Wal::open(&paths.wal(), snapshot_seq)?;
        let mut replayed = 0u64;
        let mut max_seq = snapshot_seq;
        for entry in wal.entries_after(snapshot_seq)? {
            recovered.apply_event(&entry.event);
            max_seq = entry.seq;
            replayed += 1;
        }
        wal.mark_processed(max_seq);
        info!(snapshot_seq, replayed, "state recovered");

        let state = Arc::new(Mutex::new(recovered));
        let (event_bus, reader) = EventBus::new(wal, Arc::clone(&state));
        let sink: Arc<dyn EventSink> = Arc::new(event_bus.clone());
        let clock = SystemClock;

        // At-least-once delivery: anything mid-flight when the last process
        // died goes back to waiting without losing its attempt slot
        let requeued = requeue_inflight_jobs(&state, sink.as_ref(), clock.epoch_ms())?;
        if requeued > 0 {
            info!(requeued, "re-queued jobs orphaned by the previous run");
        }

        let queue = QueueRuntime::new(Arc::clone(&state), Arc::clone(&sink), clock.clone());
        let progress = Arc::new(ProgressBus::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock.clone(),
        ));
        let accountant = Arc::new(Accountant::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock.clone(),
        ));
        let limits = LimitController::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock.clone(),
            queue.clone(),
        );

        // Stage workers, leaves first
        let stream = Arc::new(StreamWorker::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock.clone(),
            agent.clone(),
            queue.clone(),
            Arc::clone(&progress),
            Arc::clone(&accountant),
            limits.clone(),
            config.clone(),
        ));
        queue.register_worker(
            STAGE_ONE_QUEUE,
            stream,
            WorkerOpts {
                concurrency: config.stream_concurrency,
            },
        );

        let metadata = Arc::new(MetadataWorker::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            agent,
            Arc::clone(&progress),
            config.clone(),
        ));
        queue.register_worker(METADATA_QUEUE, metadata, WorkerOpts { concurrency: 2 });

        let deploy = Arc::new(DeployWorker::new(
            Arc::clone(&sink),
            clock.clone(),
            publisher,
            Arc::clone(&progress),
            config.clone(),
        ));
        let deploy_handler: Arc<dyn wf_engine::JobHandler> = Arc::clone(&deploy) as Arc<dyn wf_engine::JobHandler>;
        queue.register_worker(DEPLOY_QUEUE, deploy_handler, WorkerOpts { concurrency: 2 });

        let initiator = BuildInitiator::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock,
            queue.clone(),
            Arc::clone(&progress),
            config.clone(),
        );

        // A limit that was active at crash time re-arms its resume watcher
        limits.rearm()?;
        queue.kick();

        let maintenance = tokio::spawn(maintenance_loop(
            reader,
            event_bus.clone(),
            paths.snapshot(),
            snapshot_seq,
        ));

        Ok(Self {
            state,
            sink,
            event_bus,
            queue,
            progress,
            limits,
            initiator,
            accountant,
            deploy,
            kv: Arc::new(wf_adapters::MemoryKv::new()),
            config,
            paths,
            _maintenance: maintenance,
        })
    }

    /// Take the rollback lock and mark the project `rollingBack`.
    ///
    /// Returns `None` when another rollback holds the lock. Builds queued
    /// while the guard is held defer themselves at dispatch and are
    /// terminally canceled if the rollback fails.
    pub async fn begin_rollback(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<wf_engine::RollbackGuard>, DaemonError> {
        let lease: Arc<dyn wf_adapters::kv::Lease> = Arc::clone(&self.kv) as Arc<dyn wf_adapters::kv::Lease>;
        let Some(guard) =
            wf_engine::RollbackGuard::acquire(lease, project_id, ROLLBACK_LEASE_TTL).await?
        else {
            return Ok(None);
        };
        self.sink
            .record(Event::ProjectRollingBack {
                id: project_id.clone(),
            })
            .map_err(RuntimeError::from)?;
        Ok(Some(guard))
    }

    /// Finish a rollback, releasing the lock in a finally-scope.
    pub async fn finish_rollback(
        &self,
        project_id: &ProjectId,
        guard: wf_engine::RollbackGuard,
        success: bool,
    ) -> Result<(), DaemonError> {
        let event = if success {
            Event::ProjectRollbackDone {
                id: project_id.clone(),
            }
        } else {
            Event::ProjectRollbackFailed {
                id: project_id.clone(),
            }
        };
        let recorded = self.sink.record(event).map_err(RuntimeError::from);
        // The lease is released whatever happened above
        let released = guard.release().await;
        recorded?;
        released?;
        self.queue.kick();
        Ok(())
    }

    /// Register a project (creation itself happens outside the worker
    /// plane; this is the hook the platform calls).
    pub fn create_project(&self, project_id: &ProjectId, owner: &UserId) -> Result<(), DaemonError> {
        self.sink
            .record(Event::ProjectCreated {
                id: project_id.clone(),
                owner_id: owner.clone(),
                collaborators: Vec::new(),
                created_at_ms: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
            })
            .map_err(RuntimeError::from)?;
        Ok(())
    }

    /// Credit agent time (provisioning surface).
    pub fn grant_balance(&self, user: &UserId, seconds: i64) -> Result<(), DaemonError> {
        self.accountant.grant(user, seconds)?;
        Ok(())
    }

    /// Live subscription to a project channel.
    pub fn subscribe(&self, project_id: &ProjectId) -> Subscription {
        self.progress.subscribe(project_id)
    }

    /// Replay the durable timeline after a last-seen seq.
    pub fn replay(&self, project_id: &ProjectId, after_seq: u64) -> Vec<wf_bus::WireEvent> {
        self.progress.replay(project_id, after_seq)
    }

    pub fn state(&self) -> Arc<Mutex<MaterializedState>> {
        Arc::clone(&self.state)
    }

    pub fn health(&self) -> HealthEnvelope {
        let state = self.state.lock();
        let mut queues = HashMap::new();
        for queue in [STAGE_ONE_QUEUE, METADATA_QUEUE, DEPLOY_QUEUE] {
            queues.insert(queue.to_string(), state.queue_stats(queue));
        }
        let degraded = state.rate_limit.active
            || state.all_queues_paused
            || queues.values().any(|q| q.paused);
        HealthEnvelope {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            queues,
            rate_limit: state.rate_limit.clone(),
            projects: state.projects.len(),
            builds_in_flight: state
                .builds
                .values()
                .filter(|b| !b.status.is_terminal())
                .count(),
        }
    }

    /// Dispatch one pre-validated request.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateBuild {
                user_id,
                project_id,
                prompt,
                framework,
                is_initial_build,
                operation_id,
                previous_session_id,
                source_locale,
            } => {
                // 429 semantics while the global limit is active
                if let Some(retry_after) = self.limits.retry_after_secs() {
                    return Response::Error {
                        kind: "usage_limit_exceeded".into(),
                        message: "upstream usage limit is active".into(),
                        retry_after_secs: Some(retry_after),
                    };
                }
                let outcome = self.initiator.initiate(InitiateOptions {
                    user_id: UserId::new(user_id),
                    project_id: ProjectId::new(project_id),
                    prompt,
                    framework,
                    is_initial_build,
                    base_version_id: None,
                    previous_session_id: previous_session_id.map(SessionId::new),
                    source: source_locale,
                    operation_id: operation_id.map(OperationId::new),
                    correlation_id: None,
                    parent_message_id: None,
                });
                match outcome {
                    Ok(o) => Response::Build {
                        build_id: o.build_id.to_string(),
                        version_id: o.version_id.to_string(),
                        job_id: o.job_id,
                        status: o.status.to_string(),
                        project_path: o.project_path,
                        error: o.error,
                    },
                    Err(e) => runtime_error_response(&e),
                }
            }

            Request::ChatMessage {
                project_id,
                user_id,
                client_msg_id,
                mode,
                text,
            } => {
                let project_id = ProjectId::new(project_id);
                let user_id = UserId::new(user_id);
                let message = match self.progress.publish_durable(DurablePublish {
                    project_id: project_id.clone(),
                    user_id: user_id.to_string(),
                    actor: ActorType::Client,
                    mode,
                    parent_message_id: None,
                    build_id: None,
                    body: text.clone(),
                    response: None,
                }) {
                    Ok(message) => message,
                    Err(e) => {
                        return Response::Error {
                            kind: "internal_error".into(),
                            message: e.to_string(),
                            retry_after_secs: None,
                        }
                    }
                };

                // Build-mode messages kick off a build keyed by the client
                // message id, with the message as the reply parent
                if mode == ChatMode::Build {
                    let (is_initial, previous_session) = {
                        let state = self.state.lock();
                        let project = state.get_project(project_id.as_str());
                        (
                            project.is_none_or(|p| p.current_version_id.is_none()),
                            project.and_then(|p| p.last_session_id.clone()),
                        )
                    };
                    let initiated = self.initiator.initiate(InitiateOptions {
                        user_id,
                        project_id,
                        prompt: text,
                        framework: None,
                        is_initial_build: is_initial,
                        base_version_id: None,
                        previous_session_id: previous_session,
                        source: Some("chat".into()),
                        operation_id: Some(OperationId::new(format!("chat:{client_msg_id}"))),
                        correlation_id: None,
                        parent_message_id: Some(message.id.clone()),
                    });
                    if let Err(e) = initiated {
                        return runtime_error_response(&e);
                    }
                }

                Response::Message {
                    id: message.id.to_string(),
                    seq: message.seq,
                }
            }

            Request::AdminPause { reason, until_ms } => {
                let result = match until_ms {
                    Some(until) => self.limits.trip(&reason, Some(until)),
                    None => self.queue.pause(None, &reason),
                };
                match result {
                    Ok(()) => Response::Ack,
                    Err(e) => runtime_error_response(&e),
                }
            }

            Request::AdminResume => match self.limits.clear() {
                Ok(()) => Response::Ack,
                Err(e) => runtime_error_response(&e),
            },

            Request::AdminHealth => Response::Health(self.health()),

            Request::DeployCallback {
                deployment_id,
                status,
                url,
                project_id,
                build_id,
                version_id,
                project_path,
            } => {
                info!(deployment_id, status, "deploy callback");
                let payload = DeployPayload {
                    project_id: ProjectId::new(project_id),
                    build_id: BuildId::new(build_id),
                    version_id: VersionId::new(version_id),
                    project_path,
                };
                match apply_deploy_callback(
                    &self.deploy,
                    &payload,
                    status == "success",
                    url.as_deref(),
                ) {
                    Ok(()) => Response::Ack,
                    Err(e) => Response::Error {
                        kind: e.kind.as_str().into(),
                        message: e.message,
                        retry_after_secs: None,
                    },
                }
            }
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Orderly shutdown: stop dispatch, flush, final snapshot.
    pub fn shutdown(self) -> Result<(), DaemonError> {
        info!("daemon shutting down");
        let _ = self.sink.record(Event::Shutdown);
        self.queue.shutdown();

        let (seq, snapshot_state) = self.event_bus.snapshot_cut().map_err(DaemonError::Wal)?;
        Snapshotter::new(self.paths.snapshot())
            .write_sync(seq, &snapshot_state)
            .map_err(DaemonError::Snapshot)?;
        Ok(())
    }
}

/// Return active (mid-flight) jobs to waiting after a crash.
///
/// The attempt is rolled back by one so redelivery re-enters the same
/// attempt number instead of burning the retry budget.
fn requeue_inflight_jobs(
    state: &Arc<Mutex<MaterializedState>>,
    sink: &dyn EventSink,
    now_ms: u64,
) -> Result<usize, RuntimeError> {
    let orphaned: Vec<(String, wf_core::JobId, u32)> = {
        let state = state.lock();
        state
            .queues
            .iter()
            .flat_map(|(queue, entry)| {
                entry
                    .jobs
                    .iter()
                    .filter(|j| j.state == wf_core::JobState::Active)
                    .map(|j| (queue.clone(), j.id.clone(), j.attempt))
            })
            .collect()
    };
    let count = orphaned.len();
    for (queue, job_id, attempt) in orphaned {
        sink.record(Event::JobDeferred {
            queue,
            job_id,
            run_at_ms: now_ms,
            attempt: attempt.saturating_sub(1),
        })?;
    }
    Ok(count)
}

fn runtime_error_response(error: &RuntimeError) -> Response {
    let kind = match error {
        RuntimeError::ProjectNotFound(_) => "project_not_found",
        RuntimeError::AccessDenied { .. } => "access_denied",
        RuntimeError::StatusWriteFailed(_) => "status_write_failed",
        RuntimeError::OperationTrackingFailed(_) => "operation_tracking_failed",
        RuntimeError::EnqueueFailed(_) => "queue_enqueue_failed",
        _ => "internal_error",
    };
    Response::Error {
        kind: kind.into(),
        message: error.to_string(),
        retry_after_secs: None,
    }
}

/// Drain processed events, flush on the group-commit cadence, and snapshot
/// (then truncate the WAL) every [`SNAPSHOT_EVERY`] events.
async fn maintenance_loop(
    mut reader: EventReader,
    event_bus: EventBus,
    snapshot_path: PathBuf,
    mut last_snapshot_seq: u64,
) {
    loop {
        let entry = match reader.recv().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "maintenance read failed");
                break;
            }
        };
        reader.mark_processed(entry.seq);

        if entry.seq.saturating_sub(last_snapshot_seq) >= SNAPSHOT_EVERY {
            let cut = match event_bus.snapshot_cut() {
                Ok(cut) => cut,
                Err(e) => {
                    warn!(error = %e, "snapshot cut failed");
                    continue;
                }
            };
            let (seq, snapshot_state) = cut;
            let path = snapshot_path.clone();
            let written = tokio::task::spawn_blocking(move || {
                Snapshotter::new(path).write_sync(seq, &snapshot_state)
            })
            .await;
            match written {
                Ok(Ok(result)) => {
                    // Snapshot is durable; the tail before it can go
                    if let Err(e) = reader.wal().lock().truncate_before(seq + 1) {
                        warn!(error = %e, "WAL truncation failed");
                    }
                    last_snapshot_seq = seq;
                    info!(seq, size_bytes = result.size_bytes, "snapshot written");
                }
                Ok(Err(e)) => warn!(error = %e, "snapshot failed"),
                Err(e) => warn!(error = %e, "snapshot task panicked"),
            }
        }

        if matches!(entry.event, Event::Shutdown) {
            break;
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
