// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::fs::PermissionsExt as _;

/// Write an executable shell script to act as the agent binary.
fn script_agent(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn invocation(cwd: &Path, deadline: Duration) -> AgentInvocation {
    AgentInvocation {
        prompt: "build a hello world page".into(),
        cwd: cwd.to_path_buf(),
        env: vec![("WF_TEST".into(), "1".into())],
        resume_session: None,
        deadline,
    }
}

#[tokio::test]
async fn successful_stream_produces_a_success_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"cat > /dev/null
echo '{"type":"init","session_id":"s-77"}'
echo '{"type":"file","path":"index.html"}'
echo '{"type":"usage","input_tokens":10,"output_tokens":5}'
echo '{"type":"cost","usd":0.02}'
echo '{"type":"result","success":true}'"#,
    ));

    let outcome = agent
        .run(invocation(dir.path(), Duration::from_secs(10)), None)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.session_id.as_deref(), Some("s-77"));
    assert_eq!(outcome.files_written, vec!["index.html"]);
    assert_eq!(outcome.input_tokens, 10);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn prompt_arrives_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"prompt=$(cat)
echo "{\"type\":\"init\",\"session_id\":\"$prompt\"}"
echo '{"type":"result","success":true}'"#,
    ));

    let mut inv = invocation(dir.path(), Duration::from_secs(10));
    inv.prompt = "echo-me".into();
    let outcome = agent.run(inv, None).await.unwrap();
    assert_eq!(outcome.session_id.as_deref(), Some("echo-me"));
}

#[tokio::test]
async fn deadline_kills_the_child_and_reports_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"cat > /dev/null
echo '{"type":"init","session_id":"s-slow"}'
sleep 30"#,
    ))
    .with_kill_grace(Duration::from_millis(200));

    let started = std::time::Instant::now();
    let outcome = agent
        .run(invocation(dir.path(), Duration::from_millis(300)), None)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(matches!(
        outcome.error,
        Some(AgentFailure::TimedOut { .. })
    ));
    // Session id learned before the deadline is retained for checkpointing
    assert_eq!(outcome.session_id.as_deref(), Some("s-slow"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_binary_is_classified_not_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new("/definitely/not/here/agent");
    let outcome = agent
        .run(invocation(dir.path(), Duration::from_secs(1)), None)
        .await
        .unwrap();
    assert_eq!(outcome.error, Some(AgentFailure::BinaryMissing));
}

#[tokio::test]
async fn nonzero_exit_surfaces_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"cat > /dev/null
echo 'npm ERR! missing package.json' >&2
exit 3"#,
    ));

    let outcome = agent
        .run(invocation(dir.path(), Duration::from_secs(10)), None)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.stderr_tail.contains("missing package.json"));
    match outcome.error {
        Some(AgentFailure::Failed { exit_code, message }) => {
            assert_eq!(exit_code, Some(3));
            assert!(message.contains("package.json"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn resume_with_unknown_session_falls_back_to_fresh() {
    let dir = tempfile::tempdir().unwrap();
    // Resumed invocations get "--resume <id>" argv; report the id unknown.
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"cat > /dev/null
if [ "$1" = "--resume" ]; then
  echo '{"type":"error","error":"session_not_found"}'
  exit 1
fi
echo '{"type":"init","session_id":"s-fresh"}'
echo '{"type":"result","success":true}'"#,
    ));

    let mut inv = invocation(dir.path(), Duration::from_secs(10));
    inv.resume_session = Some(SessionId::new("s-old"));
    let outcome = agent.run(inv, None).await.unwrap();

    // No user-visible error: the run completed on a fresh session
    assert!(outcome.success);
    assert_eq!(outcome.session_id.as_deref(), Some("s-fresh"));
    assert!(!outcome.resumed);
}

#[tokio::test]
async fn progress_records_are_forwarded_live() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(
        dir.path(),
        r#"cat > /dev/null
echo '{"type":"init","session_id":"s-1"}'
echo '{"type":"tool","name":"write_file"}'
echo '{"type":"result","success":true}'"#,
    ));

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    agent
        .run(invocation(dir.path(), Duration::from_secs(10)), Some(tx))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(record) = rx.recv().await {
        kinds.push(record);
    }
    assert_eq!(kinds.len(), 3);
    assert!(matches!(kinds[1], AgentRecord::Tool { .. }));
}

// ── Preflight ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_accepts_an_executable_binary() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(dir.path(), "echo 1.0.0"));
    agent.preflight(dir.path()).await.unwrap();
}

#[tokio::test]
async fn preflight_rejects_a_missing_binary() {
    let agent = ProcessAgent::new("/no/such/agent");
    let err = agent.preflight(Path::new("/tmp")).await.unwrap_err();
    assert!(matches!(err, AgentError::BinaryMissing(_)));
}

#[tokio::test]
async fn preflight_rejects_a_non_executable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.sh");
    std::fs::write(&path, "#!/bin/sh\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o644);
    std::fs::set_permissions(&path, perms).unwrap();

    let agent = ProcessAgent::new(&path);
    let err = agent.preflight(dir.path()).await.unwrap_err();
    assert!(matches!(err, AgentError::NotExecutable(_)));
}

#[tokio::test]
async fn preflight_with_missing_project_dir_probes_parent_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let agent = ProcessAgent::new(script_agent(dir.path(), "echo 1.0.0"));

    // Neither the project dir nor its parent exist yet
    let project_dir = dir.path().join("users/u1/p1");
    agent.preflight(&project_dir).await.unwrap();

    // The probe created nothing permanent
    assert!(!dir.path().join("users").exists());
}
