//! Happy path and retry scenarios through the whole pipeline.

use crate::prelude::*;
use similar_asserts::assert_eq;
use wf_adapters::{AgentFailure, FakeAgent};
use wf_core::{BuildStatus, ChatMode, SessionId};
use wf_daemon::Request;

#[tokio::test]
async fn chat_build_reaches_deployed_with_the_expected_timeline() {
    let plane = boot();
    plane.seed();
    plane.agent.push_outcome(FakeAgent::success("s-build"));
    plane.push_metadata_outcome();

    plane.daemon.handle(Request::ChatMessage {
        project_id: "P1".into(),
        user_id: "U1".into(),
        client_msg_id: "cm-1".into(),
        mode: ChatMode::Build,
        text: "hello world".into(),
    });

    assert!(plane.wait_for_status(BuildStatus::Deployed).await);

    // Timeline shows exactly: user message, build_initiated,
    // BUILD_DEVELOPMENT_COMPLETE, build_completed
    let bodies = plane.timeline_bodies();
    assert_eq!(
        bodies,
        vec![
            "hello world",
            "build_initiated",
            "BUILD_DEVELOPMENT_COMPLETE",
            "build_completed",
        ]
    );

    let state = plane.daemon.state();
    let state = state.lock();
    let project = state.get_project("P1").unwrap();
    assert!(project.preview_url.is_some());
    // Exactly one version, named v1
    let versions = state.versions_for_project("P1");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].display_name, "v1");
    // completed >= started on the terminal build
    let build = state
        .get_build(project.current_build_id.as_ref().unwrap().as_str())
        .unwrap();
    assert!(build.completed_at_ms.unwrap() >= build.started_at_ms.unwrap());
}

#[tokio::test]
async fn timeout_then_success_creates_one_version() {
    let plane = boot();
    plane.seed();

    // Attempt 1 learns a session id, then hits the deadline
    let mut timed_out = FakeAgent::failure(AgentFailure::TimedOut { deadline_secs: 600 });
    timed_out.session_id = Some(SessionId::new("s-first"));
    plane.agent.push_outcome(timed_out);
    // Attempt 2 completes
    plane.agent.push_outcome(FakeAgent::success("s-first"));
    plane.push_metadata_outcome();

    plane.create_build("op-retry", "hello world");

    // The retry backs off (~1s) before succeeding
    assert!(plane.wait_for_status(BuildStatus::Deployed).await);

    let state = plane.daemon.state();
    let state = state.lock();
    assert_eq!(state.versions_for_project("P1").len(), 1);
    // Checkpoint persisted between the attempts
    let build_id = state.get_project("P1").unwrap().current_build_id.clone().unwrap();
    let checkpoint = state.checkpoint(build_id.as_str()).unwrap();
    assert_eq!(checkpoint.session_id.as_deref(), Some("s-first"));

    // Attempt 2 used the resume-flavored prompt path
    let prompts = plane.agent.run_prompts();
    assert!(prompts.len() >= 2);
    assert!(prompts[1].contains("Previous attempt failed"));
}

#[tokio::test]
async fn exhausted_retries_fail_the_project_with_one_message() {
    let plane = boot();
    plane.seed();
    for _ in 0..3 {
        plane.agent.push_outcome(FakeAgent::failure(AgentFailure::Failed {
            exit_code: Some(1),
            message: "exploded".into(),
        }));
    }

    plane.create_build("op-doomed", "hello world");
    assert!(plane.wait_for_status(BuildStatus::Failed).await);

    let bodies = plane.timeline_bodies();
    assert_eq!(
        bodies.iter().filter(|b| *b == "build_failed").count(),
        1
    );

    let state = plane.daemon.state();
    assert!(state.lock().versions_for_project("P1").is_empty());
}
