// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn created_inserts_project_once() {
    let mut state = MaterializedState::default();
    let event = wf_core::test_support::project_created("p1");
    state.apply_event(&event);
    state.apply_event(&event);
    assert_eq!(state.projects.len(), 1);
    assert!(state.projects["p1"].build_status.is_none());
}

#[test]
fn queued_requires_an_existing_build_row() {
    let mut state = MaterializedState::default();
    state.apply_event(&wf_core::test_support::project_created("p1"));
    state.apply_event(&Event::ProjectQueued {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("missing"),
    });
    // FK-tight: the reference was rejected
    assert!(state.projects["p1"].current_build_id.is_none());
    assert!(state.projects["p1"].build_status.is_none());
}

#[test]
fn queued_sets_status_and_current_build() {
    let state = seeded();
    let project = &state.projects["p1"];
    assert_eq!(project.build_status, Some(BuildStatus::Queued));
    assert_eq!(project.current_build_id.as_deref(), Some("b1"));
}

#[test]
fn building_records_start_and_clears_completion() {
    let mut state = seeded();
    state.projects.get_mut("p1").unwrap().last_build_completed_ms = Some(900);

    state.apply_event(&Event::ProjectBuilding {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        started_at_ms: 2_000,
    });

    let project = &state.projects["p1"];
    assert_eq!(project.build_status, Some(BuildStatus::Building));
    assert_eq!(project.last_build_started_ms, Some(2_000));
    assert!(project.last_build_completed_ms.is_none());
}

#[test]
fn deployed_clamps_completed_after_started() {
    let mut state = seeded();
    state.apply_event(&Event::ProjectBuilding {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        started_at_ms: 5_000,
    });
    state.apply_event(&Event::ProjectDeployed {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        preview_url: "https://preview.example/p1/v1".into(),
        lane: Some("static".into()),
        completed_at_ms: 4_000,
    });

    let project = &state.projects["p1"];
    assert_eq!(project.build_status, Some(BuildStatus::Deployed));
    // completed >= started always holds
    assert_eq!(project.last_build_completed_ms, Some(5_000));
    assert_eq!(
        project.preview_url.as_deref(),
        Some("https://preview.example/p1/v1")
    );
}

#[test]
fn illegal_transition_is_ignored() {
    let mut state = seeded();
    // queued → deployed is not legal
    state.apply_event(&Event::ProjectDeployed {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        preview_url: "https://x".into(),
        lane: None,
        completed_at_ms: 2_000,
    });
    assert_eq!(state.projects["p1"].build_status, Some(BuildStatus::Queued));
    assert!(state.projects["p1"].preview_url.is_none());
}

#[test]
fn rollback_cycle() {
    let mut state = seeded();
    state.apply_event(&Event::ProjectBuilding {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        started_at_ms: 2_000,
    });
    state.apply_event(&Event::ProjectDeployed {
        id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        preview_url: "https://x".into(),
        lane: None,
        completed_at_ms: 3_000,
    });
    state.apply_event(&Event::ProjectRollingBack {
        id: ProjectId::new("p1"),
    });
    assert_eq!(
        state.projects["p1"].build_status,
        Some(BuildStatus::RollingBack)
    );
    state.apply_event(&Event::ProjectRollbackFailed {
        id: ProjectId::new("p1"),
    });
    assert_eq!(
        state.projects["p1"].build_status,
        Some(BuildStatus::RollbackFailed)
    );
}

#[test]
fn session_updated_sets_last_session() {
    let mut state = seeded();
    state.apply_event(&Event::ProjectSessionUpdated {
        id: ProjectId::new("p1"),
        session_id: SessionId::new("s-123"),
    });
    assert_eq!(
        state.projects["p1"].last_session_id.as_deref(),
        Some("s-123")
    );
}
