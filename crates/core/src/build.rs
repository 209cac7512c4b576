// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build identifier and per-build state.

use crate::failure::FailureKind;
use crate::project::ProjectId;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum stderr bytes retained on a build for diagnosis.
pub const STDERR_TAIL_MAX: usize = 4096;

crate::define_id! {
    /// Unique identifier for a build (26-char ULID, lexicographically
    /// sortable by creation time).
    pub struct BuildId;
}

/// Status of a build as it moves through the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Started,
    AiCompleted,
    Deployed,
    Failed,
}

impl BuildStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStage::Deployed | BuildStage::Failed)
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Started => write!(f, "started"),
            BuildStage::AiCompleted => write!(f, "ai_completed"),
            BuildStage::Deployed => write!(f, "deployed"),
            BuildStage::Failed => write!(f, "failed"),
        }
    }
}

/// One logical unit of work progressing through the pipeline.
///
/// The row exists before any agent session may reference it; `attempt` only
/// grows while the stage-one worker retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: ProjectId,
    pub status: BuildStage,
    /// Supervised agent executions so far; 1-based once the first attempt
    /// starts.
    #[serde(default)]
    pub attempt: u32,
    /// Session id learned from the agent's first stream record. Null until
    /// the first id-bearing record arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// Last error text, carried into the next attempt's prompt context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Bounded stderr tail from the most recent agent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

impl Build {
    pub fn new(id: BuildId, project_id: ProjectId, created_at_ms: u64) -> Self {
        Self {
            id,
            project_id,
            status: BuildStage::Started,
            attempt: 0,
            session_id: None,
            created_at_ms,
            started_at_ms: None,
            completed_at_ms: None,
            last_error: None,
            failure_kind: None,
            stderr_tail: None,
        }
    }

    /// Record the start of a supervised attempt.
    ///
    /// Idempotent for a given attempt number so WAL replay does not inflate
    /// the counter.
    pub fn start_attempt(&mut self, attempt: u32, at_ms: u64) {
        if attempt > self.attempt {
            self.attempt = attempt;
        }
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(at_ms);
        }
    }

    /// Store a bounded stderr tail (keeps the end, drops the front).
    pub fn set_stderr_tail(&mut self, stderr: &str) {
        if stderr.is_empty() {
            return;
        }
        let tail = if stderr.len() > STDERR_TAIL_MAX {
            let cut = stderr.len() - STDERR_TAIL_MAX;
            // Avoid splitting a UTF-8 sequence
            let mut idx = cut;
            while !stderr.is_char_boundary(idx) {
                idx += 1;
            }
            &stderr[idx..]
        } else {
            stderr
        };
        self.stderr_tail = Some(tail.to_string());
    }

    /// Terminal completion timestamp, clamped so `completed >= started`
    /// always holds (the storage layer's check).
    pub fn complete(&mut self, status: BuildStage, at_ms: u64) {
        let at = match self.started_at_ms {
            Some(started) if at_ms < started => started,
            _ => at_ms,
        };
        self.status = status;
        self.completed_at_ms = Some(at);
    }
}

#[cfg(test)]
#[path = "build_tests.rs"]
mod tests;
