// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::AgentFailure;
use std::time::Duration;

fn invocation(prompt: &str) -> AgentInvocation {
    AgentInvocation {
        prompt: prompt.into(),
        cwd: PathBuf::from("/tmp/p1"),
        env: Vec::new(),
        resume_session: None,
        deadline: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn scripted_outcomes_are_served_in_order() {
    let agent = FakeAgent::new();
    agent.push_outcome(FakeAgent::failure(AgentFailure::TimedOut {
        deadline_secs: 60,
    }));
    agent.push_outcome(FakeAgent::success("s-2"));

    let first = agent.run(invocation("a"), None).await.unwrap();
    assert!(!first.success);
    let second = agent.run(invocation("b"), None).await.unwrap();
    assert!(second.success);
    assert_eq!(second.session_id.as_deref(), Some("s-2"));
}

#[tokio::test]
async fn dry_script_defaults_to_success() {
    let agent = FakeAgent::new();
    let outcome = agent.run(invocation("x"), None).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.session_id.as_deref(), Some("fake-session"));
}

#[tokio::test]
async fn calls_are_recorded_with_prompts() {
    let agent = FakeAgent::new();
    agent.run(invocation("first prompt"), None).await.unwrap();
    agent.preflight(&PathBuf::from("/tmp/p1")).await.unwrap();

    assert_eq!(agent.calls().len(), 2);
    assert_eq!(agent.run_prompts(), vec!["first prompt"]);
}

#[tokio::test]
async fn scripted_records_flow_to_progress() {
    let agent = FakeAgent::new();
    agent.set_records(vec![
        AgentRecord::Init {
            session_id: "s-1".into(),
        },
        AgentRecord::Tool {
            name: "write_file".into(),
        },
    ]);

    let (tx, mut rx) = mpsc::channel(8);
    agent.run(invocation("x"), Some(tx)).await.unwrap();

    assert!(matches!(
        rx.recv().await,
        Some(AgentRecord::Init { .. })
    ));
    assert!(matches!(rx.recv().await, Some(AgentRecord::Tool { .. })));
}

#[tokio::test]
async fn preflight_error_fires_once() {
    let agent = FakeAgent::new();
    agent.set_preflight_error(AgentError::BinaryMissing("/x".into()));
    assert!(agent.preflight(&PathBuf::from("/tmp")).await.is_err());
    assert!(agent.preflight(&PathBuf::from("/tmp")).await.is_ok());
}
