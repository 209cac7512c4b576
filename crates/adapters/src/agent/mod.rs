// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Code-generation agent adapters.
//!
//! The `BuildAgent` trait encapsulates all agent-specific mechanics:
//! spawning the child process, feeding the prompt over stdin, tailing the
//! NDJSON event stream, enforcing the deadline, and resuming sessions. The
//! supervisor above this layer never sees a raw process handle.
//!
//! Resume semantics: an invocation carrying `resume_session` re-enters that
//! session; if the agent reports the id as unknown, the adapter falls back
//! to a fresh session with the same prompt. Callers need not retry.

pub mod record;

mod process;
pub use process::ProcessAgent;

pub use record::{parse_line, AgentRecord, StreamTally};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{AgentCall, FakeAgent};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use wf_core::{SessionId, SessionState};

/// Errors from agent supervision plumbing (not agent-reported failures;
/// those land in [`AgentOutcome::error`]).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent binary not found: {0}")]
    BinaryMissing(String),
    #[error("agent binary not executable: {0}")]
    NotExecutable(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One supervised agent execution.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Prompt text, written to stdin in a single write followed by close.
    pub prompt: String,
    /// Working directory for the agent (the project path).
    pub cwd: PathBuf,
    /// Extra environment (inherited env plus these; HOME is guaranteed).
    pub env: Vec<(String, String)>,
    /// Session to resume, if any.
    pub resume_session: Option<SessionId>,
    /// Wall-clock budget for this attempt.
    pub deadline: Duration,
}

/// How a supervised execution failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFailure {
    /// Deadline fired; the child was terminated (exit 124 semantics).
    TimedOut { deadline_secs: u64 },
    /// Exit 127 or spawn-time NotFound.
    BinaryMissing,
    /// EACCES-class failures.
    PermissionDenied,
    /// The agent reported failure or exited non-zero.
    Failed { exit_code: Option<i32>, message: String },
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentFailure::TimedOut { deadline_secs } => {
                write!(f, "timed out after {deadline_secs}s")
            }
            AgentFailure::BinaryMissing => write!(f, "agent binary missing"),
            AgentFailure::PermissionDenied => write!(f, "permission denied"),
            AgentFailure::Failed { exit_code, message } => {
                write!(f, "agent failed (exit {exit_code:?}): {message}")
            }
        }
    }
}

/// Result of one supervised execution.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub success: bool,
    /// Learned from the first id-bearing stream record; None if the stream
    /// never produced one.
    pub session_id: Option<SessionId>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Files the agent reported writing (relative to its cwd).
    pub files_written: Vec<String>,
    /// Structured payload from the final result record.
    pub result_data: Option<serde_json::Value>,
    pub error: Option<AgentFailure>,
    /// Bounded stderr capture for diagnosis.
    pub stderr_tail: String,
    pub duration_ms: u64,
    /// True when a requested resume actually took (false after the
    /// fresh-session fallback).
    pub resumed: bool,
}

impl AgentOutcome {
    /// Terminal session state implied by this outcome.
    pub fn session_state(&self) -> SessionState {
        if self.success {
            return SessionState::Completed;
        }
        match &self.error {
            Some(AgentFailure::TimedOut { .. }) => SessionState::TimedOut,
            _ => SessionState::Failed,
        }
    }
}

/// Adapter for supervising code-generation agents.
#[async_trait]
pub trait BuildAgent: Clone + Send + Sync + 'static {
    /// Validate the agent binary is executable from the given directory.
    ///
    /// A missing project directory probes from its parent instead; any
    /// directory created for the probe is cleaned up.
    async fn preflight(&self, cwd: &Path) -> Result<(), AgentError>;

    /// Run one supervised session to completion.
    ///
    /// Parsed stream records are forwarded to `progress` (when given) as
    /// they arrive. Returns `Err` only for plumbing failures; agent-level
    /// failures (timeout, non-zero exit) come back inside the outcome.
    async fn run(
        &self,
        invocation: AgentInvocation,
        progress: Option<mpsc::Sender<AgentRecord>>,
    ) -> Result<AgentOutcome, AgentError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
