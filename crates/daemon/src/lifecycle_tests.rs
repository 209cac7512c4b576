// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;
use wf_adapters::{FakeAgent, FakePublisher};
use wf_core::{BuildStatus, Clock as _};

struct Setup {
    daemon: Daemon<FakePublisher>,
    agent: FakeAgent,
    _dir: tempfile::TempDir,
}

fn config_for(dir: &tempfile::TempDir) -> PipelineConfig {
    PipelineConfig {
        projects_root: dir.path().join("projects"),
        ..PipelineConfig::default()
    }
}

fn boot(dir: &tempfile::TempDir) -> (Daemon<FakePublisher>, FakeAgent) {
    let agent = FakeAgent::new();
    let daemon = Daemon::start(
        DaemonPaths::new(dir.path().join("state")),
        config_for(dir),
        agent.clone(),
        FakePublisher::new(),
    )
    .unwrap();
    (daemon, agent)
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let (daemon, agent) = boot(&dir);
    daemon
        .create_project(&ProjectId::new("p1"), &UserId::new("u1"))
        .unwrap();
    daemon
        .grant_balance(&UserId::new("u1"), 3_600)
        .unwrap();
    Setup {
        daemon,
        agent,
        _dir: dir,
    }
}

async fn wait_for_status(
    daemon: &Daemon<FakePublisher>,
    project: &str,
    status: BuildStatus,
) -> bool {
    let state = daemon.state();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if state
            .lock()
            .get_project(project)
            .and_then(|p| p.build_status)
            == Some(status)
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn create_build(operation: &str) -> Request {
    Request::CreateBuild {
        user_id: "u1".into(),
        project_id: "p1".into(),
        prompt: "hello world".into(),
        framework: None,
        is_initial_build: true,
        operation_id: Some(operation.into()),
        previous_session_id: None,
        source_locale: None,
    }
}

// ── End-to-end pipeline ──────────────────────────────────────────────────────

#[tokio::test]
async fn create_build_runs_the_full_pipeline_to_deployed() {
    let s = setup();
    // Metadata stage needs a schema-shaped response on its (second) run
    s.agent.push_outcome(FakeAgent::success("s-build"));
    let mut meta = FakeAgent::success("s-build");
    meta.result_data = Some(serde_json::json!({
        "recommendations": [{"title": "Add tests"}],
        "version": {"major": 0, "minor": 1, "patch": 0, "change_type": "minor"}
    }));
    s.agent.push_outcome(meta);

    let response = s.daemon.handle(create_build("op-1"));
    let build_id = match &response {
        Response::Build { build_id, status, .. } => {
            assert_eq!(status, "queued");
            build_id.clone()
        }
        other => panic!("unexpected response: {other:?}"),
    };

    assert!(wait_for_status(&s.daemon, "p1", BuildStatus::Deployed).await);

    let state = s.daemon.state();
    let state = state.lock();
    let build = state.get_build(&build_id).unwrap();
    assert_eq!(build.status, wf_core::BuildStage::Deployed);
    assert_eq!(state.versions.len(), 1);
    let project = state.get_project("p1").unwrap();
    assert!(project.preview_url.as_deref().unwrap().contains("p1"));

    // Timeline: build_initiated, BUILD_DEVELOPMENT_COMPLETE, build_completed
    let bodies: Vec<&str> = state.messages["p1"].iter().map(|m| m.body.as_str()).collect();
    assert!(bodies.contains(&"build_initiated"));
    assert!(bodies.contains(&"BUILD_DEVELOPMENT_COMPLETE"));
    assert!(bodies.contains(&"build_completed"));
}

#[tokio::test]
async fn duplicate_create_build_converges_on_one_build() {
    let s = setup();
    let first = s.daemon.handle(create_build("op-42"));
    let second = s.daemon.handle(create_build("op-42"));

    let id = |r: &Response| match r {
        Response::Build { build_id, .. } => build_id.clone(),
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(id(&first), id(&second));
}

// ── Chat entry point ─────────────────────────────────────────────────────────

#[tokio::test]
async fn build_mode_chat_appends_and_initiates() {
    let s = setup();
    let response = s.daemon.handle(Request::ChatMessage {
        project_id: "p1".into(),
        user_id: "u1".into(),
        client_msg_id: "cm-1".into(),
        mode: ChatMode::Build,
        text: "make a landing page".into(),
    });
    let Response::Message { seq, .. } = response else {
        panic!("unexpected: {response:?}");
    };
    assert_eq!(seq, 1);

    let state = s.daemon.state();
    let state = state.lock();
    // Client message + build_initiated marker
    assert!(state.messages["p1"].len() >= 2);
    // The chat message id is the idempotency key
    assert!(state.operation("p1", "chat:cm-1").is_some());
}

#[tokio::test]
async fn plan_mode_chat_only_appends() {
    let s = setup();
    s.daemon.handle(Request::ChatMessage {
        project_id: "p1".into(),
        user_id: "u1".into(),
        client_msg_id: "cm-2".into(),
        mode: ChatMode::Plan,
        text: "what should we build?".into(),
    });
    let state = s.daemon.state();
    assert!(state.lock().operations.is_empty());
}

// ── Admin surface ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reflects_pause_state() {
    let s = setup();
    let Response::Health(h) = s.daemon.handle(Request::AdminHealth) else {
        panic!()
    };
    assert_eq!(h.status, HealthStatus::Healthy);
    assert_eq!(h.status.http_code(), 200);
    assert_eq!(h.projects, 1);

    s.daemon.handle(Request::AdminPause {
        reason: "maintenance".into(),
        until_ms: None,
    });
    let Response::Health(h) = s.daemon.handle(Request::AdminHealth) else {
        panic!()
    };
    assert_eq!(h.status, HealthStatus::Degraded);
    assert_eq!(h.status.http_code(), 503);

    s.daemon.handle(Request::AdminResume);
    let Response::Health(h) = s.daemon.handle(Request::AdminHealth) else {
        panic!()
    };
    assert_eq!(h.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn create_build_during_usage_limit_returns_retry_after() {
    let s = setup();
    s.daemon.handle(Request::AdminPause {
        reason: "usage_limit_exceeded".into(),
        until_ms: Some(wf_core::SystemClock.epoch_ms() + 600_000),
    });

    let response = s.daemon.handle(create_build("op-9"));
    match response {
        Response::Error {
            kind,
            retry_after_secs,
            ..
        } => {
            assert_eq!(kind, "usage_limit_exceeded");
            let retry = retry_after_secs.unwrap();
            assert!((590..=600).contains(&retry), "retry_after={retry}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_project_maps_to_the_error_taxonomy() {
    let s = setup();
    let mut request = create_build("op-1");
    if let Request::CreateBuild { project_id, .. } = &mut request {
        *project_id = "ghost".into();
    }
    match s.daemon.handle(request) {
        Response::Error { kind, .. } => assert_eq!(kind, "project_not_found"),
        other => panic!("unexpected: {other:?}"),
    }
}

// ── Crash recovery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn inflight_jobs_are_requeued_without_burning_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let state: Arc<Mutex<MaterializedState>> = Arc::default();
    let wal = Wal::open(&dir.path().join("events.jsonl"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal, Arc::clone(&state));

    // A job that was mid-flight when the process died
    bus.record(Event::JobEnqueued {
        job: wf_core::QueueJob::new(
            wf_core::JobId::new("j1"),
            "build-stage-one",
            "build",
            serde_json::json!({}),
            wf_core::EnqueueOpts::default(),
            1_000,
        ),
    })
    .unwrap();
    bus.record(Event::JobStarted {
        queue: "build-stage-one".into(),
        job_id: wf_core::JobId::new("j1"),
        attempt: 2,
        at_ms: 2_000,
    })
    .unwrap();

    let requeued = super::requeue_inflight_jobs(&state, &bus, 9_000).unwrap();
    assert_eq!(requeued, 1);

    let state = state.lock();
    let job = state.job("build-stage-one", "j1").unwrap();
    assert_eq!(job.state, wf_core::JobState::Waiting);
    assert_eq!(job.run_at_ms, 9_000);
    // Redelivery will re-enter attempt 2, not attempt 3
    assert_eq!(job.attempt, 1);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (daemon, _agent) = boot(&dir);
        daemon
            .create_project(&ProjectId::new("p1"), &UserId::new("u1"))
            .unwrap();
        daemon.grant_balance(&UserId::new("u1"), 1_200).unwrap();
        daemon.shutdown().unwrap();
    }

    let (daemon, _agent) = boot(&dir);
    let state = daemon.state();
    let state = state.lock();
    assert!(state.projects.contains_key("p1"));
    assert_eq!(state.balance_secs("u1"), 1_200);
}

#[tokio::test]
async fn an_active_limit_rearms_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (daemon, _agent) = boot(&dir);
        daemon.handle(Request::AdminPause {
            reason: "usage_limit_exceeded".into(),
            until_ms: Some(wf_core::SystemClock.epoch_ms() + 600_000),
        });
        daemon.shutdown().unwrap();
    }

    let (daemon, _agent) = boot(&dir);
    let Response::Health(h) = daemon.handle(Request::AdminHealth) else {
        panic!()
    };
    assert_eq!(h.status, HealthStatus::Degraded);
    assert!(h.rate_limit.active);
}

// ── Rollback window ──────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_holds_the_lease_and_finishes_cleanly() {
    let s = setup();
    // Project must be deployed before it can roll back
    s.agent.push_outcome(FakeAgent::success("s-build"));
    s.daemon.handle(create_build("op-1"));
    assert!(wait_for_status(&s.daemon, "p1", BuildStatus::Deployed).await);

    let project = ProjectId::new("p1");
    let guard = s.daemon.begin_rollback(&project).await.unwrap().unwrap();
    assert_eq!(
        s.daemon
            .state()
            .lock()
            .get_project("p1")
            .unwrap()
            .build_status,
        Some(BuildStatus::RollingBack)
    );

    // The lock is exclusive while held
    assert!(s.daemon.begin_rollback(&project).await.unwrap().is_none());

    s.daemon.finish_rollback(&project, guard, true).await.unwrap();
    assert_eq!(
        s.daemon
            .state()
            .lock()
            .get_project("p1")
            .unwrap()
            .build_status,
        Some(BuildStatus::Deployed)
    );

    // Released: a later rollback can take the lock again
    let again = s.daemon.begin_rollback(&project).await.unwrap().unwrap();
    s.daemon.finish_rollback(&project, again, false).await.unwrap();
    assert_eq!(
        s.daemon
            .state()
            .lock()
            .get_project("p1")
            .unwrap()
            .build_status,
        Some(BuildStatus::RollbackFailed)
    );
}

// ── Deploy callback ──────────────────────────────────────────────────────────

#[tokio::test]
async fn deploy_callback_success_transitions_the_project() {
    let s = setup();
    // Drive a build to ai_completed but simulate a CDN-side deploy
    s.agent.push_outcome(FakeAgent::success("s-build"));
    s.daemon.handle(create_build("op-1"));
    assert!(wait_for_status(&s.daemon, "p1", BuildStatus::Deployed).await);

    // An out-of-band callback can still re-assert the deployment
    let (build_id, version_id) = {
        let state = s.daemon.state();
        let state = state.lock();
        let p = state.get_project("p1").unwrap();
        (
            p.current_build_id.clone().unwrap().to_string(),
            p.current_version_id.clone().unwrap().to_string(),
        )
    };
    let response = s.daemon.handle(Request::DeployCallback {
        deployment_id: "cf-1".into(),
        status: "success".into(),
        url: Some("https://cdn.example/p1/v1".into()),
        project_id: "p1".into(),
        build_id,
        version_id,
        project_path: s.daemon.config().projects_root.join("u1/p1"),
    });
    assert!(matches!(response, Response::Ack));

    let state = s.daemon.state();
    assert_eq!(
        state.lock().get_project("p1").unwrap().preview_url.as_deref(),
        Some("https://cdn.example/p1/v1")
    );
}
