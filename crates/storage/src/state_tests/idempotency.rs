// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn op_recorded(build: &str, version: &str) -> Event {
    Event::OperationRecorded {
        project_id: ProjectId::new("p1"),
        operation_id: OperationId::new("op-42"),
        build_id: BuildId::new(build),
        version_id: VersionId::new(version),
        at_ms: 1_000,
    }
}

#[test]
fn first_operation_mapping_wins_forever() {
    let mut state = MaterializedState::default();
    state.apply_event(&op_recorded("b1", "v1"));
    // A concurrent duplicate resolves different candidate ids; conflict-do-nothing
    state.apply_event(&op_recorded("b-other", "v-other"));

    let op = state.operation("p1", "op-42").unwrap();
    assert_eq!(op.build_id.as_str(), "b1");
    assert_eq!(op.version_id.as_str(), "v1");
    assert_eq!(state.operations.len(), 1);
}

#[test]
fn job_id_starts_empty_and_is_patched_after_enqueue() {
    let mut state = MaterializedState::default();
    state.apply_event(&op_recorded("b1", "v1"));
    assert!(state.operation("p1", "op-42").unwrap().job_id.is_none());

    state.apply_event(&Event::OperationJobPatched {
        project_id: ProjectId::new("p1"),
        operation_id: OperationId::new("op-42"),
        job_id: "build:p1:op-42".into(),
    });
    assert_eq!(
        state.operation("p1", "op-42").unwrap().job_id.as_deref(),
        Some("build:p1:op-42")
    );
}

#[test]
fn operations_are_scoped_per_project() {
    let mut state = MaterializedState::default();
    state.apply_event(&op_recorded("b1", "v1"));
    state.apply_event(&Event::OperationRecorded {
        project_id: ProjectId::new("p2"),
        operation_id: OperationId::new("op-42"),
        build_id: BuildId::new("b2"),
        version_id: VersionId::new("v2"),
        at_ms: 1_000,
    });
    assert_eq!(state.operations.len(), 2);
    assert_eq!(
        state.operation("p2", "op-42").unwrap().build_id.as_str(),
        "b2"
    );
}

#[test]
fn exactly_one_build_row_per_operation_pair() {
    let mut state = seeded();
    state.apply_event(&op_recorded("b1", "v1"));
    state.apply_event(&op_recorded("b1", "v1"));

    let build_count = state
        .builds
        .values()
        .filter(|b| b.project_id == "p1")
        .count();
    assert_eq!(build_count, 1);
}
