// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage-three worker: publish the artifact and finish the lifecycle.
//!
//! Lane selection comes from the agent's `deploy-intent.json` (authoritative
//! when present, `static` otherwise). On success the project transitions to
//! `deployed` with a preview URL; on terminal failure to `failed`. Version
//! rows are never created or deleted here; the stream stage owns them.

use crate::config::PipelineConfig;
use crate::queue::{JobError, JobHandler, JobVerdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use wf_adapters::{Lane, PublishRequest, Publisher};
use wf_bus::{DurablePublish, ProgressBus, SYSTEM_USER};
use wf_core::{
    ActorType, BuildId, ChatMode, Clock, Event, EventSink, FailureKind, ProjectId, QueueJob,
    VersionId,
};

/// Payload of a deploy queue job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployPayload {
    pub project_id: ProjectId,
    pub build_id: BuildId,
    pub version_id: VersionId,
    pub project_path: PathBuf,
}

/// The agent's deploy intent, written to `<hidden>/deploy-intent.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub lane: Lane,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Resolve the runtime lane from the project's deploy intent.
///
/// Missing or unreadable intent falls back to `static`.
pub fn resolve_lane(project_path: &Path, hidden_dir: &str) -> Lane {
    let intent_path = project_path.join(hidden_dir).join("deploy-intent.json");
    match std::fs::read(&intent_path) {
        Ok(bytes) => match serde_json::from_slice::<DeployIntent>(&bytes) {
            Ok(intent) => intent.lane,
            Err(e) => {
                warn!(path = %intent_path.display(), error = %e, "unreadable deploy intent, defaulting to static");
                Lane::Static
            }
        },
        Err(_) => Lane::Static,
    }
}

/// Stage-three worker.
pub struct DeployWorker<P: Publisher, C: Clock> {
    sink: Arc<dyn EventSink>,
    clock: C,
    publisher: P,
    bus: Arc<ProgressBus<C>>,
    config: PipelineConfig,
}

impl<P: Publisher, C: Clock> DeployWorker<P, C> {
    pub fn new(
        sink: Arc<dyn EventSink>,
        clock: C,
        publisher: P,
        bus: Arc<ProgressBus<C>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sink,
            clock,
            publisher,
            bus,
            config,
        }
    }

    fn finish_deployed(
        &self,
        payload: &DeployPayload,
        url: &str,
        lane: Lane,
    ) -> Result<(), JobError> {
        let now = self.clock.epoch_ms();
        self.sink
            .record(Event::ProjectDeployed {
                id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                preview_url: url.to_string(),
                lane: Some(lane.as_str().to_string()),
                completed_at_ms: now,
            })
            .map_err(|e| JobError::new(FailureKind::DeployFailed, e.to_string()))?;
        self.sink
            .record(Event::BuildDeployed {
                id: payload.build_id.clone(),
                completed_at_ms: now,
            })
            .map_err(|e| JobError::new(FailureKind::DeployFailed, e.to_string()))?;

        if let Err(e) = self.bus.publish_durable(DurablePublish {
            project_id: payload.project_id.clone(),
            user_id: SYSTEM_USER.into(),
            actor: ActorType::System,
            mode: ChatMode::Build,
            parent_message_id: None,
            build_id: Some(payload.build_id.clone()),
            body: "build_completed".into(),
            response: Some(serde_json::json!({
                "type": "build_completed",
                "previewUrl": url,
                "lane": lane.as_str(),
            })),
        }) {
            warn!(error = %e, "failed to publish build_completed (continuing)");
        }
        info!(build_id = %payload.build_id, url, lane = %lane, "deployed");
        Ok(())
    }

    fn finish_failed(&self, payload: &DeployPayload, message: &str) {
        let now = self.clock.epoch_ms();
        let _ = self.sink.record(Event::BuildFailed {
            id: payload.build_id.clone(),
            kind: FailureKind::DeployFailed,
            error: message.to_string(),
            completed_at_ms: now,
        });
        let _ = self.sink.record(Event::ProjectFailed {
            id: payload.project_id.clone(),
            build_id: payload.build_id.clone(),
            completed_at_ms: now,
        });
    }
}

#[async_trait]
impl<P: Publisher, C: Clock> JobHandler for DeployWorker<P, C> {
    async fn run(&self, job: QueueJob) -> Result<JobVerdict, JobError> {
        let payload: DeployPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::new(FailureKind::ValidationError, e.to_string()))?;

        let lane = resolve_lane(&payload.project_path, &self.config.hidden_dir);
        let request = PublishRequest {
            project_id: payload.project_id.clone(),
            version_id: payload.version_id.clone(),
            project_path: payload.project_path.clone(),
            lane,
        };

        match self.publisher.publish(request).await {
            Ok(site) => {
                self.finish_deployed(&payload, &site.url, site.lane)?;
                Ok(JobVerdict::Completed)
            }
            Err(e) => {
                warn!(build_id = %payload.build_id, error = %e, attempt = job.attempt, "publish failed");
                if job.attempt >= job.max_attempts {
                    self.finish_failed(&payload, &e.to_string());
                }
                Err(JobError::new(FailureKind::DeployFailed, e.to_string()))
            }
        }
    }
}

/// Apply an out-of-band deployment callback (e.g. the CDN reporting an
/// async deploy finished). Success transitions project and build exactly
/// like the in-process worker path.
pub fn apply_deploy_callback<C: Clock>(
    worker: &DeployWorker<impl Publisher, C>,
    payload: &DeployPayload,
    success: bool,
    url: Option<&str>,
) -> Result<(), JobError> {
    if success {
        let lane = resolve_lane(&payload.project_path, &worker.config.hidden_dir);
        worker.finish_deployed(payload, url.unwrap_or_default(), lane)
    } else {
        worker.finish_failed(payload, "deployment callback reported failure");
        Ok(())
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
