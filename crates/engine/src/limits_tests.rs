// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{fixture, wait_for, ScriptedHandler};
use crate::queue::WorkerOpts;
use wf_core::{EnqueueOpts, FakeClock, JobId, JobState};

fn setup() -> (
    LimitController<FakeClock>,
    QueueRuntime<FakeClock>,
    FakeClock,
    Arc<Mutex<MaterializedState>>,
) {
    let (state, sink, clock) = fixture();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let queue = QueueRuntime::new(Arc::clone(&state), Arc::clone(&sink), clock.clone());
    let controller = LimitController::new(Arc::clone(&state), sink, clock.clone(), queue.clone());
    (controller, queue, clock, state)
}

#[tokio::test]
async fn usage_limit_trips_with_the_upstream_reset_time() {
    let (controller, _queue, _clock, state) = setup();
    let tripped = controller
        .observe(&FailureKind::UsageLimitExceeded {
            reset_at_ms: Some(1_600_000),
        })
        .unwrap();

    assert!(tripped);
    let limit = controller.active().unwrap();
    assert_eq!(limit.reset_at_ms, Some(1_600_000));
    assert_eq!(limit.reason.as_deref(), Some("usage_limit_exceeded"));
    assert!(state.lock().all_queues_paused);
}

#[tokio::test]
async fn system_config_error_trips_with_the_default_cooldown() {
    let (controller, _queue, clock, _state) = setup();
    controller.observe(&FailureKind::SystemConfigError).unwrap();

    let limit = controller.active().unwrap();
    let reset = limit.reset_at_ms.unwrap();
    assert!(reset > clock.epoch_ms());
}

#[tokio::test]
async fn retryable_kinds_do_not_trip() {
    let (controller, _queue, _clock, state) = setup();
    assert!(!controller.observe(&FailureKind::AgentTimeout).unwrap());
    assert!(!controller
        .observe(&FailureKind::InsufficientBalance)
        .unwrap());
    assert!(controller.active().is_none());
    assert!(!state.lock().all_queues_paused);
}

#[tokio::test]
async fn retry_after_counts_down_to_the_reset() {
    let (controller, _queue, clock, _state) = setup();
    let reset = clock.epoch_ms() + 600_000;
    controller.trip("usage_limit_exceeded", Some(reset)).unwrap();

    assert_eq!(controller.retry_after_secs(), Some(600));
    clock.advance_ms(300_000);
    assert_eq!(controller.retry_after_secs(), Some(300));
}

#[tokio::test]
async fn no_stream_dispatch_while_the_limit_is_active() {
    let (controller, queue, clock, state) = setup();
    let handler = ScriptedHandler::new();
    queue.register_worker("build-stage-one", handler.clone(), WorkerOpts::default());

    controller
        .trip("usage_limit_exceeded", Some(clock.epoch_ms() + 600_000))
        .unwrap();
    queue
        .enqueue(
            "build-stage-one",
            "build",
            serde_json::json!({}),
            EnqueueOpts::default(),
            JobId::new("j1"),
        )
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(handler.run_count(), 0);

    // Past the reset, the watcher auto-resumes and the queued work drains
    clock.advance_ms(600_001);
    assert!(
        wait_for(
            || state.lock().job("build-stage-one", "j1").map(|j| j.state)
                == Some(JobState::Completed),
            std::time::Duration::from_secs(3)
        )
        .await
    );
    assert!(controller.active().is_none());
}

#[tokio::test]
async fn manual_clear_resumes_immediately() {
    let (controller, _queue, clock, state) = setup();
    controller
        .trip("usage_limit_exceeded", Some(clock.epoch_ms() + 600_000))
        .unwrap();
    controller.clear().unwrap();

    assert!(controller.active().is_none());
    assert!(!state.lock().all_queues_paused);
}

#[tokio::test]
async fn clear_if_expired_respects_the_deadline() {
    let (controller, _queue, clock, _state) = setup();
    controller
        .trip("usage_limit_exceeded", Some(clock.epoch_ms() + 10_000))
        .unwrap();

    assert!(!controller.clear_if_expired().unwrap());
    clock.advance_ms(10_001);
    assert!(controller.clear_if_expired().unwrap());
    assert!(controller.active().is_none());
}

#[tokio::test]
async fn rearm_after_boot_restores_the_pause_and_watcher() {
    let (controller, _queue, clock, state) = setup();

    // Simulate replayed state that says the limit is active
    state.lock().apply_event(&Event::LimitTripped {
        reason: "usage_limit_exceeded".into(),
        reset_at_ms: Some(clock.epoch_ms() + 1_000),
    });
    // The pause flag itself was not replayed (fresh queues)
    state.lock().all_queues_paused = false;

    controller.rearm().unwrap();
    assert!(state.lock().all_queues_paused);

    clock.advance_ms(2_000);
    assert!(
        wait_for(
            || !state.lock().rate_limit.active,
            std::time::Duration::from_secs(3)
        )
        .await
    );
}
