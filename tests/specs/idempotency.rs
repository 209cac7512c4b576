//! Operation idempotency under duplicate requests.

use crate::prelude::*;
use wf_core::BuildStatus;
use wf_engine::STAGE_ONE_QUEUE;

#[tokio::test]
async fn duplicate_operations_yield_one_build_and_one_job() {
    let plane = boot();
    plane.seed();
    plane.push_stream_then_metadata();

    // Two requests with the same operationId, back to back
    let first = plane.create_build("op-42", "hello world");
    let second = plane.create_build("op-42", "hello world");

    assert_eq!(build_id_of(&first), build_id_of(&second));

    let state = plane.daemon.state();
    let state = state.lock();
    // Exactly one Build row for the (project, operation) pair
    assert_eq!(state.builds.len(), 1);
    // Only one stage-one job was enqueued (same deterministic jobId)
    assert_eq!(state.queues[STAGE_ONE_QUEUE].jobs.len(), 1);
    assert!(state.job(STAGE_ONE_QUEUE, "build:P1:op-42").is_some());
    // One BuildOperation row
    assert_eq!(state.operations.len(), 1);
}

#[tokio::test]
async fn replays_after_completion_do_not_rebuild() {
    let plane = boot();
    plane.seed();
    plane.push_stream_then_metadata();

    plane.create_build("op-42", "hello world");
    assert!(plane.wait_for_status(BuildStatus::Deployed).await);
    let runs_before = plane.agent.run_prompts().len();

    // A late duplicate of the original request changes nothing
    let response = plane.create_build("op-42", "hello world");
    assert_eq!(build_id_of(&response), {
        let state = plane.daemon.state();
        let id = state
            .lock()
            .get_project("P1")
            .unwrap()
            .current_build_id
            .clone()
            .unwrap();
        id.to_string()
    });

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(plane.agent.run_prompts().len(), runs_before);
}
