// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn attempt_started_grows_monotonically() {
    let mut state = seeded();
    state.apply_event(&Event::BuildAttemptStarted {
        id: BuildId::new("b1"),
        attempt: 1,
        at_ms: 2_000,
    });
    state.apply_event(&Event::BuildAttemptStarted {
        id: BuildId::new("b1"),
        attempt: 1,
        at_ms: 2_500,
    });
    let build = &state.builds["b1"];
    assert_eq!(build.attempt, 1);
    assert_eq!(build.started_at_ms, Some(2_000));
}

#[test]
fn session_is_null_until_identified_then_patched() {
    let mut state = seeded();
    assert!(state.builds["b1"].session_id.is_none());

    state.apply_event(&Event::BuildSessionIdentified {
        id: BuildId::new("b1"),
        session_id: SessionId::new("s-9"),
    });
    assert_eq!(state.builds["b1"].session_id.as_deref(), Some("s-9"));
}

#[test]
fn attempt_failure_keeps_last_error_for_prompt_context() {
    let mut state = seeded();
    state.apply_event(&Event::BuildAttemptFailed {
        id: BuildId::new("b1"),
        attempt: 1,
        kind: FailureKind::AgentTimeout,
        error: "deadline exceeded after 600s".into(),
        stderr_tail: Some("npm ERR! missing package.json".into()),
        at_ms: 3_000,
    });
    let build = &state.builds["b1"];
    assert_eq!(build.status, wf_core::BuildStage::Started);
    assert_eq!(
        build.last_error.as_deref(),
        Some("deadline exceeded after 600s")
    );
    assert!(build.stderr_tail.as_deref().unwrap().contains("package.json"));
}

#[test]
fn terminal_build_has_completed_at_after_started_at() {
    let mut state = seeded();
    state.apply_event(&Event::BuildAttemptStarted {
        id: BuildId::new("b1"),
        attempt: 1,
        at_ms: 5_000,
    });
    state.apply_event(&Event::BuildFailed {
        id: BuildId::new("b1"),
        kind: FailureKind::AgentError,
        error: "exit 1".into(),
        completed_at_ms: 4_000,
    });
    let build = &state.builds["b1"];
    assert_eq!(build.status, wf_core::BuildStage::Failed);
    assert!(build.completed_at_ms.unwrap() >= build.started_at_ms.unwrap());
}

// ── Versions ─────────────────────────────────────────────────────────────────

fn version_created(id: &str, display_seq: u32) -> Event {
    Event::VersionCreated {
        id: VersionId::new(id),
        project_id: ProjectId::new("p1"),
        build_id: BuildId::new("b1"),
        display_seq,
        session_id: Some(SessionId::new("s-9")),
        created_at_ms: 4_000,
    }
}

#[test]
fn version_created_only_after_ai_completion_path() {
    let mut state = seeded();
    state.apply_event(&version_created("v1", 1));

    let version = &state.versions["v1"];
    assert_eq!(version.display_name, "v1");
    assert_eq!(version.session_id.as_deref(), Some("s-9"));
    assert_eq!(
        state.projects["p1"].current_version_id.as_deref(),
        Some("v1")
    );
    assert_eq!(state.projects["p1"].version_counter, 1);
}

#[test]
fn no_version_for_a_failed_build() {
    let mut state = seeded();
    state.apply_event(&Event::BuildFailed {
        id: BuildId::new("b1"),
        kind: FailureKind::AgentError,
        error: "exit 1".into(),
        completed_at_ms: 3_000,
    });
    state.apply_event(&version_created("v1", 1));
    assert!(state.versions.is_empty());
    assert!(state.projects["p1"].current_version_id.is_none());
}

#[test]
fn version_for_unknown_build_is_rejected() {
    let mut state = MaterializedState::default();
    state.apply_event(&wf_core::test_support::project_created("p1"));
    state.apply_event(&version_created("v1", 1));
    assert!(state.versions.is_empty());
}

#[test]
fn semantics_do_not_overwrite_display_name() {
    let mut state = seeded();
    state.apply_event(&version_created("v1", 1));
    state.apply_event(&Event::VersionSemanticsSet {
        version_id: VersionId::new("v1"),
        major: 1,
        minor: 2,
        patch: 0,
        change_type: wf_core::ChangeType::Minor,
    });
    let version = &state.versions["v1"];
    assert_eq!(version.display_name, "v1");
    assert_eq!(version.semver(), "1.2.0");
}

#[test]
fn versions_for_project_sorts_by_display_seq() {
    let mut state = seeded();
    state.apply_event(&version_created("v2", 2));
    state.apply_event(&version_created("v1", 1));
    let versions = state.versions_for_project("p1");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].display_seq, 1);
    assert_eq!(versions[1].display_seq, 2);
}

// ── Checkpoints ──────────────────────────────────────────────────────────────

#[test]
fn checkpoint_saved_replaces_by_build() {
    let mut state = seeded();
    let checkpoint = wf_core::BuildCheckpoint {
        build_id: BuildId::new("b1"),
        session_id: Some(SessionId::new("s-9")),
        files_before: vec!["index.html".into()],
        input_tokens: 100,
        output_tokens: 50,
        cost_usd: 0.25,
        attempt: 1,
        saved_at_ms: 3_000,
    };
    state.apply_event(&Event::CheckpointSaved {
        checkpoint: checkpoint.clone(),
    });
    let mut second = checkpoint;
    second.attempt = 2;
    second.input_tokens = 300;
    state.apply_event(&Event::CheckpointSaved { checkpoint: second });

    let stored = state.checkpoint("b1").unwrap();
    assert_eq!(stored.attempt, 2);
    assert_eq!(stored.input_tokens, 300);
    assert_eq!(state.checkpoints.len(), 1);
}
