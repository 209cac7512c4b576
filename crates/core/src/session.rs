// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent session identifier and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// The agent's own conversational context identifier (a UUID assigned by
    /// the agent itself, learned from the first record of its output stream).
    pub struct SessionId;
}

/// Lifecycle of a supervised agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Spawning,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Spawning | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Spawning => write!(f, "spawning"),
            SessionState::Running => write!(f, "running"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::TimedOut => write!(f, "timed_out"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}
