//! Usage-limit and pause behavior across the plane.

use crate::prelude::*;
use std::time::Duration;
use wf_adapters::{AgentFailure, FakeAgent};
use wf_core::{BuildStatus, JobState};
use wf_daemon::{HealthStatus, Request, Response};
use wf_engine::STAGE_ONE_QUEUE;

#[tokio::test]
async fn in_flight_usage_limit_pauses_the_plane_and_new_builds_get_429() {
    let plane = boot();
    plane.seed();
    plane.agent.push_outcome(FakeAgent::failure(AgentFailure::Failed {
        exit_code: Some(1),
        message: "usage limit exceeded, retry later".into(),
    }));

    plane.create_build("op-1", "hello world");

    // The worker classifies the failure and trips the controller
    let state = plane.daemon.state();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if state.lock().rate_limit.active {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "limit never tripped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Health degrades; new builds are refused with Retry-After semantics
    let Response::Health(h) = plane.daemon.handle(Request::AdminHealth) else {
        panic!()
    };
    assert_eq!(h.status, HealthStatus::Degraded);

    match plane.create_build("op-2", "another") {
        Response::Error {
            kind,
            retry_after_secs,
            ..
        } => {
            assert_eq!(kind, "usage_limit_exceeded");
            assert!(retry_after_secs.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn resume_after_limit_processes_queued_work() {
    let plane = boot();
    plane.seed();

    // Pause everything up front, then queue a build
    plane.daemon.handle(Request::AdminPause {
        reason: "maintenance".into(),
        until_ms: None,
    });
    plane.push_stream_then_metadata();
    plane.create_build("op-1", "hello world");

    tokio::time::sleep(Duration::from_millis(150)).await;
    {
        let state = plane.daemon.state();
        let state = state.lock();
        // Accepted but not dispatched
        let job = state.job(STAGE_ONE_QUEUE, "build:P1:op-1").unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempt, 0);
    }

    plane.daemon.handle(Request::AdminResume);
    assert!(plane.wait_for_status(BuildStatus::Deployed).await);
}

#[tokio::test]
async fn unrecoverable_failures_do_not_burn_the_attempt_budget() {
    let plane = boot();
    plane.seed();
    // Drain the user's balance so pre-flight fails unrecoverably
    {
        let state = plane.daemon.state();
        state.lock().balances.clear();
    }

    plane.create_build("op-1", "hello world");
    assert!(plane.wait_for_status(BuildStatus::Failed).await);

    let state = plane.daemon.state();
    let state = state.lock();
    let job = state.job(STAGE_ONE_QUEUE, "build:P1:op-1").unwrap();
    assert_eq!(job.state, JobState::Dead);
    // One attempt, and the counter stays put on later dispatch passes
    assert_eq!(job.attempt, 1);
}
