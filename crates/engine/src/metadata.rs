// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage-two worker: recommendations, documentation, version semantics.
//!
//! Re-enters the agent session that produced the build. The stage is
//! advisory: its failures are logged and broadcast as
//! `recommendations_failed` but never demote the build from
//! `ai_completed`. Every write is keyed by build or version id, so
//! re-execution converges on the same state.

use crate::config::PipelineConfig;
use crate::queue::{JobError, JobHandler, JobVerdict};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use wf_adapters::{AgentInvocation, BuildAgent};
use wf_bus::{ProgressBus, SYSTEM_USER};
use wf_core::{
    BuildId, ChangeType, Clock, Event, EventSink, FailureKind, ProjectId, QueueJob, SessionId,
    UserId, VersionId,
};
use wf_storage::MaterializedState;

const RECOMMENDATIONS_PROMPT: &str = "Review the project you just built. Respond with JSON only: \
     {\"recommendations\": [{\"title\", \"description\", \"priority\"}...], \
     \"version\": {\"major\", \"minor\", \"patch\", \"change_type\"}} where \
     change_type is one of \"major\", \"minor\", \"patch\".";

const DOCS_PROMPT: &str = "Write a short project overview for the app you just built: what it \
     does, how it is structured, and how to run it. Respond with JSON only: \
     {\"markdown\": \"...\"}.";

const COMPACT_PROMPT: &str = "Summarize this session's context so future work can continue from \
     a compact state.";

/// Payload of a metadata queue job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub project_id: ProjectId,
    pub build_id: BuildId,
    pub version_id: VersionId,
    pub user_id: UserId,
    /// Resume hint from the stream stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub is_initial_build: bool,
}

/// Expected shape of the agent's recommendations response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationsDoc {
    pub recommendations: Vec<Recommendation>,
    pub version: VersionSemantics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSemantics {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub change_type: ChangeType,
}

/// Shape of the agent's documentation response.
#[derive(Debug, Clone, Deserialize)]
struct DocsResponse {
    markdown: String,
}

/// Stage-two worker.
pub struct MetadataWorker<A: BuildAgent, C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    agent: A,
    bus: Arc<ProgressBus<C>>,
    config: PipelineConfig,
}

impl<A: BuildAgent, C: Clock> MetadataWorker<A, C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        agent: A,
        bus: Arc<ProgressBus<C>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            state,
            sink,
            agent,
            bus,
            config,
        }
    }

    fn invocation(
        &self,
        payload: &MetadataPayload,
        prompt: &str,
        session: Option<SessionId>,
    ) -> AgentInvocation {
        AgentInvocation {
            prompt: prompt.to_string(),
            cwd: self
                .config
                .project_path(&payload.user_id, &payload.project_id),
            env: Vec::new(),
            resume_session: session,
            deadline: self.config.metadata_timeout,
        }
    }

    fn broadcast_failure(&self, payload: &MetadataPayload, reason: &str) {
        let mut map = serde_json::Map::new();
        map.insert("buildId".into(), payload.build_id.as_str().into());
        map.insert("reason".into(), reason.into());
        self.bus.publish_ephemeral(
            &payload.project_id,
            "recommendations_failed",
            SYSTEM_USER,
            map,
        );
    }

    /// Resume the session for recommendations; parse strictly; persist.
    async fn recommendations_phase(
        &self,
        payload: &MetadataPayload,
        session: &mut Option<SessionId>,
    ) -> Result<(), JobError> {
        let already_recorded = self
            .state
            .lock()
            .recommendations
            .contains_key(payload.build_id.as_str());
        if already_recorded {
            // An asynchronous worker got here first; converge silently
            info!(build_id = %payload.build_id, "recommendations already recorded, skipping");
            return Ok(());
        }

        let outcome = self
            .agent
            .run(
                self.invocation(payload, RECOMMENDATIONS_PROMPT, session.clone()),
                None,
            )
            .await
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        if let Some(new_session) = &outcome.session_id {
            *session = Some(new_session.clone());
        }

        let raw = outcome.result_data.ok_or_else(|| {
            self.broadcast_failure(payload, "no structured response");
            JobError::new(FailureKind::SchemaDrift, "agent returned no structured response")
        })?;
        let doc: RecommendationsDoc = serde_json::from_value(raw.clone()).map_err(|e| {
            // Prompt drift incident: the model stopped matching the schema
            self.broadcast_failure(payload, "schema mismatch");
            JobError::new(FailureKind::SchemaDrift, format!("schema mismatch: {e}"))
        })?;

        let hidden = self
            .config
            .project_path(&payload.user_id, &payload.project_id)
            .join(&self.config.hidden_dir);
        std::fs::create_dir_all(&hidden)
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        std::fs::write(
            hidden.join("recommendations.json"),
            serde_json::to_vec_pretty(&doc)
                .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?,
        )
        .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;

        self.sink
            .record(Event::RecommendationsRecorded {
                project_id: payload.project_id.clone(),
                build_id: payload.build_id.clone(),
                version_id: payload.version_id.clone(),
                payload: raw,
            })
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        // Semantic labels never touch the vN display name
        self.sink
            .record(Event::VersionSemanticsSet {
                version_id: payload.version_id.clone(),
                major: doc.version.major,
                minor: doc.version.minor,
                patch: doc.version.patch,
                change_type: doc.version.change_type,
            })
            .map_err(|e| JobError::new(FailureKind::AgentError, e.to_string()))?;
        Ok(())
    }

    /// Initial builds also get a human-readable project overview.
    async fn docs_phase(&self, payload: &MetadataPayload, session: &mut Option<SessionId>) {
        let outcome = match self
            .agent
            .run(self.invocation(payload, DOCS_PROMPT, session.clone()), None)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(build_id = %payload.build_id, error = %e, "docs generation failed");
                return;
            }
        };
        if let Some(new_session) = &outcome.session_id {
            *session = Some(new_session.clone());
        }
        let Some(docs) = outcome
            .result_data
            .and_then(|raw| serde_json::from_value::<DocsResponse>(raw).ok())
        else {
            warn!(build_id = %payload.build_id, "docs response unusable, skipping");
            return;
        };

        let hidden = self
            .config
            .project_path(&payload.user_id, &payload.project_id)
            .join(&self.config.hidden_dir);
        if let Err(e) = std::fs::create_dir_all(&hidden)
            .and_then(|_| std::fs::write(hidden.join("project-info.md"), docs.markdown))
        {
            warn!(build_id = %payload.build_id, error = %e, "failed to write project info");
        }
    }

    /// Feature-flagged session compaction for cheaper continuations.
    async fn compact_phase(&self, payload: &MetadataPayload, session: &mut Option<SessionId>) {
        match self
            .agent
            .run(self.invocation(payload, COMPACT_PROMPT, session.clone()), None)
            .await
        {
            Ok(outcome) if outcome.success => {
                if let Some(new_session) = outcome.session_id {
                    *session = Some(new_session);
                }
            }
            Ok(_) => warn!(build_id = %payload.build_id, "session compaction reported failure"),
            Err(e) => warn!(build_id = %payload.build_id, error = %e, "session compaction failed"),
        }
    }
}

#[async_trait]
impl<A: BuildAgent, C: Clock> JobHandler for MetadataWorker<A, C> {
    async fn run(&self, job: QueueJob) -> Result<JobVerdict, JobError> {
        let payload: MetadataPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::new(FailureKind::ValidationError, e.to_string()))?;

        let mut session = payload.session_id.clone();

        self.recommendations_phase(&payload, &mut session).await?;

        if payload.is_initial_build {
            self.docs_phase(&payload, &mut session).await;
        }

        if self.config.compact_sessions {
            self.compact_phase(&payload, &mut session).await;
        }

        // Session continuity back onto the project
        if let Some(session_id) = session {
            let _ = self.sink.record(Event::ProjectSessionUpdated {
                id: payload.project_id.clone(),
                session_id,
            });
        }

        Ok(JobVerdict::Completed)
    }
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
