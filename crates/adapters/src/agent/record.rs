// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent event-stream records.
//!
//! The agent's stdout is UTF-8 newline-delimited JSON: the first record
//! carries the `session_id`, subsequent records carry tool calls, file
//! writes, token deltas, cost updates, and a final `result`. The stream is
//! lazy, finite, and not restartable.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One NDJSON record from the agent's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRecord {
    /// First record of a session; reveals the agent's session id.
    Init { session_id: String },

    /// A tool invocation (name only; arguments are the agent's business).
    Tool { name: String },

    /// The agent wrote a file (path relative to its cwd).
    File { path: String },

    /// Token delta since the previous usage record.
    Usage {
        #[serde(default)]
        input_tokens: u64,
        #[serde(default)]
        output_tokens: u64,
    },

    /// Cumulative cost update.
    Cost { usd: f64 },

    /// Mid-stream error report (e.g. `session_not_found` on resume).
    Error { error: String },

    /// Final record of the stream.
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Structured response payload (used by the metadata stage).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Unknown record type, skipped (kept for forward compatibility).
    #[serde(other)]
    Other,
}

impl AgentRecord {
    /// Whether this record reports an unknown-session condition, which the
    /// supervisor treats as "fall back to a fresh session".
    pub fn is_session_not_found(&self) -> bool {
        let text = match self {
            AgentRecord::Error { error } => error,
            AgentRecord::Result {
                error: Some(error), ..
            } => error,
            _ => return false,
        };
        let lower = text.to_lowercase();
        lower.contains("session_not_found") || lower.contains("session not found")
    }
}

/// Parse one stdout line. Blank lines and malformed JSON yield `None`.
pub fn parse_line(line: &str) -> Option<AgentRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, "unparseable agent record, skipping");
            None
        }
    }
}

/// Folds a record stream into the fields of an outcome.
#[derive(Debug, Default)]
pub struct StreamTally {
    pub session_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub files_written: Vec<String>,
    pub result: Option<(bool, Option<String>)>,
    pub result_data: Option<serde_json::Value>,
    pub session_not_found: bool,
}

impl StreamTally {
    pub fn absorb(&mut self, record: &AgentRecord) {
        if record.is_session_not_found() {
            self.session_not_found = true;
        }
        match record {
            AgentRecord::Init { session_id } => {
                // First id-bearing record wins
                if self.session_id.is_none() {
                    self.session_id = Some(session_id.clone());
                }
            }
            AgentRecord::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.input_tokens += input_tokens;
                self.output_tokens += output_tokens;
            }
            AgentRecord::Cost { usd } => self.cost_usd = *usd,
            AgentRecord::File { path } => self.files_written.push(path.clone()),
            AgentRecord::Result {
                success,
                error,
                data,
            } => {
                self.result = Some((*success, error.clone()));
                self.result_data = data.clone();
            }
            AgentRecord::Tool { .. } | AgentRecord::Error { .. } | AgentRecord::Other => {}
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
