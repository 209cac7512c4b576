// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use wf_core::{
    BuildId, EnqueueOpts, FailureKind, JobId, MessageId, OperationId, ProjectId, SessionId,
    VersionId,
};

mod accounting;
mod builds;
mod idempotency;
mod messages;
mod projects;
mod queue;

/// State with project `p1` and build `b1` already queued.
fn seeded() -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&wf_core::test_support::project_created("p1"));
    state.apply_event(&Event::BuildCreated {
        id: BuildId::new("b1"),
        project_id: ProjectId::new("p1"),
        created_at_ms: 1_000,
    });
    state.apply_event(&Event::ProjectQueued {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
    });
    state
}

fn enqueued(queue: &str, id: &str) -> Event {
    Event::JobEnqueued {
        job: QueueJob::new(
            JobId::new(id),
            queue,
            "build",
            serde_json::json!({"n": 1}),
            EnqueueOpts::default(),
            1_000,
        ),
    }
}

fn message(id: &str, seq: u64) -> Message {
    wf_core::test_support::client_message(id, "p1", seq, "hello")
}
