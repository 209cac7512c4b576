//! Shared fixtures for the workspace specs.

use std::time::Duration;
use wf_adapters::{FakeAgent, FakePublisher};
use wf_core::{BuildStatus, ProjectId, UserId};
use wf_daemon::{Daemon, DaemonPaths, Request, Response};
use wf_engine::PipelineConfig;

pub struct Plane {
    pub daemon: Daemon<FakePublisher>,
    pub agent: FakeAgent,
    pub publisher: FakePublisher,
    pub dir: tempfile::TempDir,
}

/// Boot a daemon against a fresh temp state directory.
pub fn boot() -> Plane {
    let dir = tempfile::tempdir().unwrap();
    boot_in(dir)
}

/// Boot against an existing directory (restart scenarios).
pub fn boot_in(dir: tempfile::TempDir) -> Plane {
    let agent = FakeAgent::new();
    let publisher = FakePublisher::new();
    let daemon = Daemon::start(
        DaemonPaths::new(dir.path().join("state")),
        PipelineConfig {
            projects_root: dir.path().join("projects"),
            ..PipelineConfig::default()
        },
        agent.clone(),
        publisher.clone(),
    )
    .unwrap();
    Plane {
        daemon,
        agent,
        publisher,
        dir,
    }
}

impl Plane {
    /// Register project `P1` for user `U1` with an hour of agent time.
    pub fn seed(&self) {
        self.daemon
            .create_project(&ProjectId::new("P1"), &UserId::new("U1"))
            .unwrap();
        self.daemon
            .grant_balance(&UserId::new("U1"), 3_600)
            .unwrap();
    }

    /// Stream success followed by a schema-shaped metadata response.
    pub fn push_stream_then_metadata(&self) {
        self.agent.push_outcome(FakeAgent::success("s-build"));
        self.push_metadata_outcome();
    }

    /// Queue a schema-shaped metadata response.
    pub fn push_metadata_outcome(&self) {
        let mut outcome = FakeAgent::success("s-meta");
        outcome.result_data = Some(serde_json::json!({
            "recommendations": [{"title": "Add tests", "description": "There are none"}],
            "version": {"major": 0, "minor": 1, "patch": 0, "change_type": "minor"}
        }));
        self.agent.push_outcome(outcome);
    }

    pub fn create_build(&self, operation_id: &str, prompt: &str) -> Response {
        self.daemon.handle(Request::CreateBuild {
            user_id: "U1".into(),
            project_id: "P1".into(),
            prompt: prompt.into(),
            framework: None,
            is_initial_build: true,
            operation_id: Some(operation_id.into()),
            previous_session_id: None,
            source_locale: None,
        })
    }

    pub async fn wait_for_status(&self, status: BuildStatus) -> bool {
        let state = self.daemon.state();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if state
                .lock()
                .get_project("P1")
                .and_then(|p| p.build_status)
                == Some(status)
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn timeline_bodies(&self) -> Vec<String> {
        let state = self.daemon.state();
        let state = state.lock();
        state
            .messages
            .get("P1")
            .map(|msgs| msgs.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

/// Unwrap a build response.
pub fn build_id_of(response: &Response) -> String {
    match response {
        Response::Build { build_id, .. } => build_id.clone(),
        other => panic!("expected build response, got {other:?}"),
    }
}
