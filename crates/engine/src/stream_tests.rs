// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::accounting::Accountant;
use crate::config::STAGE_ONE_QUEUE;
use std::path::PathBuf;
use wf_adapters::{AgentCall, FakeAgent};
use wf_core::{BuildStage, FakeClock, JobState};
use wf_storage::test_support::MemorySink;

struct Setup {
    worker: StreamWorker<FakeAgent, FakeClock>,
    agent: FakeAgent,
    state: Arc<Mutex<MaterializedState>>,
    limits: LimitController<FakeClock>,
    _dir: tempfile::TempDir,
    project_dir: PathBuf,
}

fn setup() -> Setup {
    let state: Arc<Mutex<MaterializedState>> = Arc::default();
    let sink = MemorySink::new(Arc::clone(&state));
    let clock = FakeClock::new(1_000_000);
    let sink_arc: Arc<dyn EventSink> = Arc::new(sink.clone());

    // Seed: project p1 owned by u1, build b1, queued, funded
    sink.record(wf_core::test_support::project_created("p1"))
        .unwrap();
    sink.record(Event::BuildCreated {
        id: BuildId::new("b1"),
        project_id: ProjectId::new("p1"),
        created_at_ms: 1_000,
    })
    .unwrap();
    sink.record(Event::ProjectQueued {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
    })
    .unwrap();
    sink.record(Event::BalanceGranted {
        user_id: UserId::new("u1"),
        seconds: 3_600,
    })
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        projects_root: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let project_dir = config.project_path(&UserId::new("u1"), &ProjectId::new("p1"));

    let queue = QueueRuntime::new(Arc::clone(&state), Arc::clone(&sink_arc), clock.clone());
    let bus = Arc::new(ProgressBus::new(
        Arc::clone(&state),
        Arc::clone(&sink_arc),
        clock.clone(),
    ));
    let accountant = Arc::new(Accountant::new(
        Arc::clone(&state),
        Arc::clone(&sink_arc),
        clock.clone(),
    ));
    let limits = LimitController::new(
        Arc::clone(&state),
        Arc::clone(&sink_arc),
        clock.clone(),
        queue.clone(),
    );
    let agent = FakeAgent::new();

    Setup {
        worker: StreamWorker::new(
            Arc::clone(&state),
            Arc::clone(&sink_arc),
            clock,
            agent.clone(),
            queue,
            bus,
            accountant,
            limits.clone(),
            config,
        ),
        agent,
        state,
        limits,
        _dir: dir,
        project_dir,
    }
}

fn job(attempt: u32) -> QueueJob {
    let payload = StreamPayload {
        project_id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        version_id: VersionId::new("v1"),
        user_id: UserId::new("u1"),
        prompt: "hello world".into(),
        framework: None,
        is_initial_build: true,
        base_version_id: None,
        previous_session_id: None,
        parent_message_id: None,
        delay_until_rollback_complete: false,
    };
    let mut job = QueueJob::new(
        JobId::new("build:p1:b1"),
        STAGE_ONE_QUEUE,
        "build",
        serde_json::to_value(payload).unwrap(),
        EnqueueOpts::default(),
        1_000_000,
    );
    job.attempt = attempt;
    job
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn success_reaches_ai_completed_with_a_version_and_handoffs() {
    let s = setup();
    let verdict = s.worker.run(job(1)).await.unwrap();
    assert_eq!(verdict, JobVerdict::Completed);

    let state = s.state.lock();
    let build = state.get_build("b1").unwrap();
    assert_eq!(build.status, BuildStage::AiCompleted);
    assert_eq!(build.session_id.as_deref(), Some("fake-session"));
    assert!(build.completed_at_ms.unwrap() >= build.started_at_ms.unwrap());

    // Version v1 created exactly once, carrying the session
    let version = state.get_version("v1").unwrap();
    assert_eq!(version.display_name, "v1");
    assert_eq!(version.session_id.as_deref(), Some("fake-session"));

    // Session continuity onto the project
    assert_eq!(
        state.get_project("p1").unwrap().last_session_id.as_deref(),
        Some("fake-session")
    );

    // Checkpoint persisted for any future attempt
    assert!(state.checkpoint("b1").is_some());

    // Handoff jobs on both queues
    assert!(state.job(METADATA_QUEUE, "metadata:b1").is_some());
    assert!(state.job(DEPLOY_QUEUE, "deploy:b1").is_some());

    // Durable completion message
    let timeline = &state.messages["p1"];
    assert!(timeline
        .iter()
        .any(|m| m.body == "BUILD_DEVELOPMENT_COMPLETE" && m.actor == ActorType::Assistant));
    drop(state);

    // Wall-clock metering charged the user
    assert!(s.state.lock().balance_secs("u1") <= 3_600);

    // Working directory with hidden metadata dir and ignore entry
    assert!(s.project_dir.join(".webforge").is_dir());
    let ignore = std::fs::read_to_string(s.project_dir.join(".gitignore")).unwrap();
    assert!(ignore.contains(".webforge/"));
}

// ── Failure classification ───────────────────────────────────────────────────

#[tokio::test]
async fn insufficient_balance_is_unrecoverable_and_terminal() {
    let s = setup();
    s.state.lock().balances.clear();

    let err = s.worker.run(job(1)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InsufficientBalance);
    assert!(err.unrecoverable());

    let state = s.state.lock();
    assert_eq!(
        state.get_project("p1").unwrap().build_status,
        Some(BuildStatus::Failed)
    );
    assert_eq!(state.get_build("b1").unwrap().status, BuildStage::Failed);
    // No version for a failed build
    assert!(state.versions.is_empty());
    // One assistant build_failed message on the timeline
    let failed: Vec<_> = state.messages["p1"]
        .iter()
        .filter(|m| m.body == "build_failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].response.as_ref().unwrap()["error_type"],
        "insufficient_balance"
    );
}

#[tokio::test]
async fn active_usage_limit_fails_preflight_with_reset_time() {
    let s = setup();
    s.limits
        .trip("usage_limit_exceeded", Some(1_600_000))
        .unwrap();

    let err = s.worker.run(job(1)).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::UsageLimitExceeded {
            reset_at_ms: Some(1_600_000)
        }
    );
    // No meter was started for the doomed attempt
    assert!(s.state.lock().meters.is_empty());
}

#[tokio::test]
async fn binary_missing_trips_the_limit_controller() {
    let s = setup();
    s.agent
        .set_preflight_error(wf_adapters::AgentError::BinaryMissing("/usr/bin/agent".into()));

    let err = s.worker.run(job(1)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::SystemConfigError);
    assert!(err.unrecoverable());

    let state = s.state.lock();
    assert!(state.rate_limit.active);
    assert!(state.all_queues_paused);
}

#[tokio::test]
async fn timeout_is_retryable_and_records_attempt_context() {
    let s = setup();
    s.agent.push_outcome(FakeAgent::failure(AgentFailure::TimedOut {
        deadline_secs: 600,
    }));

    let err = s.worker.run(job(1)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::AgentTimeout);
    assert!(!err.unrecoverable());

    let state = s.state.lock();
    // Not terminal: project still building, ready for the retry
    assert_eq!(
        state.get_project("p1").unwrap().build_status,
        Some(BuildStatus::Building)
    );
    let build = state.get_build("b1").unwrap();
    assert!(build.last_error.as_deref().unwrap().contains("timed out"));
    assert!(state.versions.is_empty());
    // The attempt's meter was refunded
    assert_eq!(state.balance_secs("u1"), 3_600);
}

#[tokio::test]
async fn third_failed_attempt_is_terminal() {
    let s = setup();
    s.agent.push_outcome(FakeAgent::failure(AgentFailure::Failed {
        exit_code: Some(1),
        message: "agent exploded".into(),
    }));

    let err = s.worker.run(job(3)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::AgentError);

    let state = s.state.lock();
    assert_eq!(
        state.get_project("p1").unwrap().build_status,
        Some(BuildStatus::Failed)
    );
    let failed = state
        .messages["p1"]
        .iter()
        .find(|m| m.body == "build_failed")
        .unwrap();
    assert_eq!(failed.response.as_ref().unwrap()["attempt"], 3);
}

// ── Retry context ────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_resumes_from_the_checkpoint_session_with_files_context() {
    let s = setup();
    std::fs::create_dir_all(&s.project_dir).unwrap();
    std::fs::write(s.project_dir.join("index.html"), "<html>").unwrap();

    // Attempt 1 times out after learning the session id
    let mut timed_out = FakeAgent::failure(AgentFailure::TimedOut { deadline_secs: 600 });
    timed_out.session_id = Some(SessionId::new("s-attempt-1"));
    s.agent.push_outcome(timed_out);
    let _ = s.worker.run(job(1)).await.unwrap_err();

    {
        let state = s.state.lock();
        let checkpoint = state.checkpoint("b1").unwrap();
        assert_eq!(checkpoint.session_id.as_deref(), Some("s-attempt-1"));
        assert!(checkpoint.files_before.contains(&"index.html".to_string()));
    }

    // Attempt 2 succeeds; version is created exactly once
    s.worker.run(job(2)).await.unwrap();

    let runs: Vec<_> = s
        .agent
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            AgentCall::Run {
                prompt,
                resume_session,
                ..
            } => Some((prompt, resume_session)),
            _ => None,
        })
        .collect();
    assert_eq!(runs.len(), 2);
    // Resume prompt carries the files-seen list and the prior error
    assert!(runs[1].0.contains("index.html"));
    assert!(runs[1].0.contains("Previous attempt failed"));
    assert_eq!(runs[1].1.as_deref(), Some("s-attempt-1"));

    let state = s.state.lock();
    assert_eq!(state.versions.len(), 1);
    assert_eq!(state.get_version("v1").unwrap().display_name, "v1");
}

// ── Mock bypass ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mock_sessions_skip_deploy_and_record_a_static_preview() {
    let s = setup();
    s.agent.push_outcome(FakeAgent::success("mock_session_e2e"));

    s.worker.run(job(1)).await.unwrap();

    let state = s.state.lock();
    let project = state.get_project("p1").unwrap();
    assert_eq!(project.build_status, Some(BuildStatus::Deployed));
    assert_eq!(
        project.preview_url.as_deref(),
        Some("https://preview.invalid/mock")
    );
    // Metadata still runs; deploy does not
    assert!(state.job(METADATA_QUEUE, "metadata:b1").is_some());
    assert!(state.job(DEPLOY_QUEUE, "deploy:b1").is_none());
}

#[tokio::test]
async fn non_mock_prefixes_are_not_bypassed() {
    let s = setup();
    s.agent.push_outcome(FakeAgent::success("mockingbird-1"));
    s.worker.run(job(1)).await.unwrap();
    assert!(s.state.lock().job(DEPLOY_QUEUE, "deploy:b1").is_some());
}

// ── Rollback window ──────────────────────────────────────────────────────────

#[tokio::test]
async fn work_defers_while_a_rollback_is_in_flight() {
    let s = setup();
    s.state.lock().projects.get_mut("p1").unwrap().build_status =
        Some(BuildStatus::RollingBack);

    let verdict = s.worker.run(job(1)).await.unwrap();
    assert!(matches!(verdict, JobVerdict::Deferred { .. }));
    // Nothing ran
    assert!(s.agent.calls().is_empty());
}

#[tokio::test]
async fn a_failed_rollback_terminally_cancels_deferred_work() {
    let s = setup();
    s.state.lock().projects.get_mut("p1").unwrap().build_status =
        Some(BuildStatus::RollbackFailed);

    let mut deferred = job(1);
    let mut payload: StreamPayload = serde_json::from_value(deferred.payload.clone()).unwrap();
    payload.delay_until_rollback_complete = true;
    deferred.payload = serde_json::to_value(payload).unwrap();

    let err = s.worker.run(deferred).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Canceled);
    assert!(err.unrecoverable());
}

// ── Placement ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn strays_are_swept_and_system_files_flagged() {
    let s = setup();
    let base = s.project_dir.parent().unwrap().to_path_buf();
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join("README.md"), "# stray").unwrap();
    std::fs::write(base.join("worker-hook.js"), "nope").unwrap();

    s.worker.run(job(1)).await.unwrap();

    assert!(s.project_dir.join("README.md").exists());
    assert!(base.join("worker-hook.js").exists());
    let state = s.state.lock();
    assert_eq!(state.security_events.len(), 1);
    assert!(state.security_events[0].path.contains("worker-hook.js"));
}
