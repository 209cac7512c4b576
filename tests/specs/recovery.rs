//! Crash recovery: snapshot + WAL replay.

use crate::prelude::*;
use wf_core::{BuildStatus, JobState};
use wf_daemon::Request;
use wf_engine::STAGE_ONE_QUEUE;

#[tokio::test]
async fn queued_work_survives_a_restart_and_completes() {
    let dir = {
        let plane = boot();
        plane.seed();
        // Hold the queue so the job is still waiting at shutdown
        plane.daemon.handle(Request::AdminPause {
            reason: "restart drill".into(),
            until_ms: None,
        });
        plane.create_build("op-1", "hello world");
        {
            let state = plane.daemon.state();
            assert_eq!(
                state.lock().job(STAGE_ONE_QUEUE, "build:P1:op-1").unwrap().state,
                JobState::Waiting
            );
        }
        let Plane { daemon, dir, .. } = plane;
        daemon.shutdown().unwrap();
        dir
    };

    // Reboot on the same state directory
    let plane = boot_in(dir);
    plane.push_stream_then_metadata();
    {
        let state = plane.daemon.state();
        let state = state.lock();
        // The job and the pause both survived
        assert!(state.job(STAGE_ONE_QUEUE, "build:P1:op-1").is_some());
        assert!(state.all_queues_paused);
    }

    plane.daemon.handle(Request::AdminResume);
    assert!(plane.wait_for_status(BuildStatus::Deployed).await);
}

#[tokio::test]
async fn idempotency_mappings_survive_restart() {
    let dir = {
        let plane = boot();
        plane.seed();
        plane.push_stream_then_metadata();
        let response = plane.create_build("op-42", "hello world");
        let _ = build_id_of(&response);
        assert!(plane.wait_for_status(BuildStatus::Deployed).await);
        let Plane { daemon, dir, .. } = plane;
        daemon.shutdown().unwrap();
        dir
    };

    let plane = boot_in(dir);
    let before = {
        let state = plane.daemon.state();
        let id = state
            .lock()
            .get_project("P1")
            .unwrap()
            .current_build_id
            .clone()
            .unwrap();
        id.to_string()
    };

    // The original mapping still wins after reboot
    let response = plane.create_build("op-42", "hello world");
    assert_eq!(build_id_of(&response), before);
}
