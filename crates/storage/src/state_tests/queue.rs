// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

// ── Basic transitions ────────────────────────────────────────────────────────

#[test]
fn enqueued_creates_waiting_job() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("build-stage-one", "j1"));

    let job = state.job("build-stage-one", "j1").unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempt, 0);
}

#[test]
fn enqueue_with_same_id_is_a_noop() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("build-stage-one", "j1"));
    state.apply_event(&enqueued("build-stage-one", "j1"));
    assert_eq!(state.queues["build-stage-one"].jobs.len(), 1);
}

#[test]
fn started_marks_active_and_counts_the_attempt() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    let started = Event::JobStarted {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        attempt: 1,
        at_ms: 2_000,
    };
    state.apply_event(&started);
    state.apply_event(&started);

    let job = state.job("q", "j1").unwrap();
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempt, 1);
}

#[test]
fn failed_with_retry_goes_back_to_waiting() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    state.apply_event(&Event::JobStarted {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        attempt: 1,
        at_ms: 2_000,
    });
    state.apply_event(&Event::JobFailed {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        error: "agent exited 1".into(),
        kind: Some(FailureKind::AgentError),
        retry_at_ms: Some(4_000),
    });

    let job = state.job("q", "j1").unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.run_at_ms, 4_000);
    assert!(!job.is_ready(3_000));
    assert!(job.is_ready(4_000));
}

#[test]
fn failed_without_retry_is_final() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    state.apply_event(&Event::JobFailed {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        error: "out of retries".into(),
        kind: Some(FailureKind::AgentError),
        retry_at_ms: None,
    });
    assert_eq!(state.job("q", "j1").unwrap().state, JobState::Failed);
}

#[test]
fn dead_records_the_unrecoverable_kind() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    state.apply_event(&Event::JobDead {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        kind: FailureKind::InsufficientBalance,
        error: "balance exhausted".into(),
    });
    let job = state.job("q", "j1").unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.failure_kind, Some(FailureKind::InsufficientBalance));
}

#[test]
fn deferred_restores_attempt_and_reschedules() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    state.apply_event(&Event::JobStarted {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        attempt: 1,
        at_ms: 2_000,
    });
    state.apply_event(&Event::JobDeferred {
        queue: "q".into(),
        job_id: JobId::new("j1"),
        run_at_ms: 9_000,
        attempt: 0,
    });

    let job = state.job("q", "j1").unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.run_at_ms, 9_000);
    // Deferral does not consume an attempt
    assert_eq!(job.attempt, 0);
}

// ── Pause / resume ───────────────────────────────────────────────────────────

#[test]
fn per_queue_pause_blocks_only_that_queue() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("a", "j1"));
    state.apply_event(&enqueued("b", "j2"));
    state.apply_event(&Event::QueuePaused {
        queue: Some("a".into()),
        reason: "maintenance".into(),
    });

    assert!(!state.queue_dispatchable("a"));
    assert!(state.queue_dispatchable("b"));

    state.apply_event(&Event::QueueResumed {
        queue: Some("a".into()),
    });
    assert!(state.queue_dispatchable("a"));
}

#[test]
fn global_pause_blocks_everything() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("a", "j1"));
    state.apply_event(&Event::QueuePaused {
        queue: None,
        reason: "usage_limit_exceeded".into(),
    });
    assert!(!state.queue_dispatchable("a"));
    assert!(!state.queue_dispatchable("never-seen"));

    state.apply_event(&Event::QueueResumed { queue: None });
    assert!(state.queue_dispatchable("a"));
}

#[test]
fn active_rate_limit_blocks_dispatch() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("a", "j1"));
    state.apply_event(&Event::LimitTripped {
        reason: "usage_limit_exceeded".into(),
        reset_at_ms: Some(600_000),
    });
    assert!(!state.queue_dispatchable("a"));

    state.apply_event(&Event::LimitCleared);
    assert!(state.queue_dispatchable("a"));
}

#[test]
fn paused_queue_still_accepts_enqueues() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::QueuePaused {
        queue: Some("q".into()),
        reason: "hold".into(),
    });
    state.apply_event(&enqueued("q", "j1"));
    assert_eq!(state.queues["q"].jobs.len(), 1);
    assert!(!state.queue_dispatchable("q"));
}

// ── Stats & retention ────────────────────────────────────────────────────────

#[test]
fn stats_count_by_state() {
    let mut state = MaterializedState::default();
    state.apply_event(&enqueued("q", "j1"));
    state.apply_event(&enqueued("q", "j2"));
    state.apply_event(&Event::JobStarted {
        queue: "q".into(),
        job_id: JobId::new("j2"),
        attempt: 1,
        at_ms: 2_000,
    });

    let stats = state.queue_stats("q");
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.completed, 0);
    assert!(!stats.paused);
}

#[test]
fn completed_jobs_are_pruned_beyond_retention() {
    let mut state = MaterializedState::default();
    for n in 0..4 {
        let mut job = QueueJob::new(
            JobId::new(format!("j{n}")),
            "q",
            "build",
            serde_json::json!({}),
            EnqueueOpts {
                remove_on_complete: 2,
                ..EnqueueOpts::default()
            },
            1_000 + n,
        );
        job.state = JobState::Waiting;
        state.apply_event(&Event::JobEnqueued { job });
    }
    for n in 0..4 {
        state.apply_event(&Event::JobCompleted {
            queue: "q".into(),
            job_id: JobId::new(format!("j{n}")),
        });
    }

    let completed: Vec<_> = state.queues["q"]
        .jobs
        .iter()
        .filter(|j| j.state == JobState::Completed)
        .collect();
    assert_eq!(completed.len(), 2);
    // Newest survive
    assert!(completed.iter().any(|j| j.id == "j2"));
    assert!(completed.iter().any(|j| j.id == "j3"));
}

// ── Repeatables ──────────────────────────────────────────────────────────────

#[test]
fn repeatable_identity_is_stable_across_reboots() {
    let mut state = MaterializedState::default();
    let added = Event::RepeatableAdded {
        repeatable: Repeatable {
            name: "sweep".into(),
            queue: "maintenance".into(),
            schedule: "0 0 * * * *".into(),
            payload: serde_json::json!({}),
            last_fired_at_ms: None,
        },
    };
    state.apply_event(&added);
    state.apply_event(&added); // re-registration after restart
    assert_eq!(state.queues["maintenance"].repeatables.len(), 1);

    state.apply_event(&Event::RepeatableFired {
        queue: "maintenance".into(),
        name: "sweep".into(),
        at_ms: 9_000,
    });
    assert_eq!(
        state.queues["maintenance"].repeatables[0].last_fired_at_ms,
        Some(9_000)
    );
}
