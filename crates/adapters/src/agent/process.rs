// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process agent supervisor.
//!
//! Spawns the agent binary with `cwd` at the project path, writes the prompt
//! to stdin in a single write, and drains stdout continuously as NDJSON
//! records. The deadline is armed on a separate timer; on expiry the child
//! gets SIGTERM, then SIGKILL after a grace window.

use super::record::{parse_line, AgentRecord, StreamTally};
use super::{AgentError, AgentFailure, AgentInvocation, AgentOutcome, BuildAgent};
use crate::subprocess::run_with_timeout;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wf_core::SessionId;

/// Cap on captured stderr.
const STDERR_CAP: usize = 64 * 1024;

/// Supervises the real agent binary as a child process.
#[derive(Clone)]
pub struct ProcessAgent {
    binary: PathBuf,
    args: Vec<String>,
    kill_grace: Duration,
}

impl ProcessAgent {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            kill_grace: crate::env::kill_grace(),
        }
    }

    /// Extra arguments passed on every invocation.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// SIGTERM, wait out the grace window, SIGKILL if still alive.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("agent ignored SIGTERM, sending SIGKILL");
                let _ = child.kill().await;
            }
        }
    }

    async fn run_once(
        &self,
        invocation: &AgentInvocation,
        resume: Option<&SessionId>,
        progress: Option<mpsc::Sender<AgentRecord>>,
        started: Instant,
    ) -> Result<(AgentOutcome, bool), AgentError> {
        let deadline_secs = invocation.deadline.as_secs();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        if let Some(session) = resume {
            cmd.arg("--resume").arg(session.as_str());
        }
        cmd.current_dir(&invocation.cwd);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if std::env::var_os("HOME").is_none() {
            cmd.env("HOME", "/tmp");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((
                    failed_outcome(AgentFailure::BinaryMissing, started),
                    false,
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok((
                    failed_outcome(AgentFailure::PermissionDenied, started),
                    false,
                ));
            }
            Err(e) => return Err(AgentError::SpawnFailed(e.to_string())),
        };

        // Prompt: single write, then close. A child that exits before
        // reading produces a broken pipe, which the stream loop will report.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(invocation.prompt.as_bytes()).await {
                debug!(error = %e, "prompt write failed");
            }
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::with_capacity(4096);
                let mut chunk = [0u8; 4096];
                while let Ok(n) = stderr.read(&mut chunk).await {
                    if n == 0 {
                        break;
                    }
                    if buf.len() < STDERR_CAP {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let deadline = tokio::time::Instant::now() + invocation.deadline;
        let mut tally = StreamTally::default();
        let mut timed_out = false;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(record) = parse_line(&line) {
                                tally.absorb(&record);
                                if let Some(tx) = &progress {
                                    let _ = tx.send(record).await;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(error = %e, "agent stdout read error");
                            break;
                        }
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        let status = if timed_out {
            self.terminate(&mut child).await;
            child.wait().await.ok()
        } else {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    debug!(error = %e, "agent wait failed");
                    None
                }
                Err(_) => {
                    timed_out = true;
                    self.terminate(&mut child).await;
                    child.wait().await.ok()
                }
            }
        };

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let exit_code = status.and_then(|s| s.code());
        let (success, error) = if timed_out {
            (false, Some(AgentFailure::TimedOut { deadline_secs }))
        } else {
            classify_exit(exit_code, &tally, &stderr_tail, deadline_secs)
        };

        let session_not_found = tally.session_not_found;
        let outcome = AgentOutcome {
            success,
            session_id: tally.session_id.map(SessionId::new),
            input_tokens: tally.input_tokens,
            output_tokens: tally.output_tokens,
            cost_usd: tally.cost_usd,
            files_written: tally.files_written,
            result_data: tally.result_data,
            error,
            stderr_tail,
            duration_ms: started.elapsed().as_millis() as u64,
            resumed: resume.is_some() && !session_not_found,
        };
        Ok((outcome, session_not_found))
    }
}

fn failed_outcome(failure: AgentFailure, started: Instant) -> AgentOutcome {
    AgentOutcome {
        success: false,
        error: Some(failure),
        duration_ms: started.elapsed().as_millis() as u64,
        ..AgentOutcome::default()
    }
}

fn classify_exit(
    exit_code: Option<i32>,
    tally: &StreamTally,
    stderr_tail: &str,
    deadline_secs: u64,
) -> (bool, Option<AgentFailure>) {
    match exit_code {
        Some(0) => match &tally.result {
            Some((true, _)) => (true, None),
            Some((false, message)) => (
                false,
                Some(AgentFailure::Failed {
                    exit_code,
                    message: message
                        .clone()
                        .unwrap_or_else(|| "agent reported failure".to_string()),
                }),
            ),
            None => (
                false,
                Some(AgentFailure::Failed {
                    exit_code,
                    message: "stream ended without a result record".to_string(),
                }),
            ),
        },
        Some(124) => (false, Some(AgentFailure::TimedOut { deadline_secs })),
        Some(127) => (false, Some(AgentFailure::BinaryMissing)),
        code => {
            let message = tally
                .result
                .as_ref()
                .and_then(|(_, e)| e.clone())
                .or_else(|| stderr_tail.lines().next().map(String::from))
                .unwrap_or_else(|| "unspecified failure".to_string());
            (
                false,
                Some(AgentFailure::Failed {
                    exit_code: code,
                    message,
                }),
            )
        }
    }
}

#[async_trait]
impl BuildAgent for ProcessAgent {
    async fn preflight(&self, cwd: &Path) -> Result<(), AgentError> {
        let meta = match std::fs::metadata(&self.binary) {
            Ok(meta) => meta,
            Err(_) => {
                return Err(AgentError::BinaryMissing(
                    self.binary.display().to_string(),
                ))
            }
        };
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(AgentError::NotExecutable(self.binary.display().to_string()));
        }

        // Probe from the project directory; fall back to its parent when the
        // directory has not been created yet.
        let (probe_dir, created_root) = probe_dir_for(cwd)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--version").current_dir(&probe_dir);
        let result =
            run_with_timeout(cmd, crate::env::preflight_timeout(), "agent preflight").await;

        // Clean up anything the probe had to create
        if let Some(root) = created_root {
            let _ = std::fs::remove_dir_all(&root);
        }

        result.map(|_| ()).map_err(AgentError::SpawnFailed)
    }

    async fn run(
        &self,
        invocation: AgentInvocation,
        progress: Option<mpsc::Sender<AgentRecord>>,
    ) -> Result<AgentOutcome, AgentError> {
        let started = Instant::now();
        let mut resume = invocation.resume_session.clone();

        loop {
            let (outcome, session_not_found) = self
                .run_once(&invocation, resume.as_ref(), progress.clone(), started)
                .await?;

            // Unknown session id on resume: discard the resume attempt and
            // spawn a fresh session with the same prompt. Not an error.
            if resume.is_some() && session_not_found {
                info!(
                    session = %resume.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                    "resume target unknown, falling back to a fresh session"
                );
                resume = None;
                continue;
            }

            return Ok(outcome);
        }
    }
}

/// Pick the directory to probe from. Returns the probe dir plus the root of
/// any directory chain this call had to create (for cleanup).
fn probe_dir_for(cwd: &Path) -> Result<(PathBuf, Option<PathBuf>), AgentError> {
    if cwd.exists() {
        return Ok((cwd.to_path_buf(), None));
    }
    let parent = cwd.parent().unwrap_or(Path::new("."));
    if parent.exists() {
        return Ok((parent.to_path_buf(), None));
    }
    // Find the deepest existing ancestor so we know what we created
    let mut existing = parent;
    while let Some(up) = existing.parent() {
        if up.exists() {
            break;
        }
        existing = up;
    }
    std::fs::create_dir_all(parent)?;
    Ok((parent.to_path_buf(), Some(existing.to_path_buf())))
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
