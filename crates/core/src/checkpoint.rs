// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Between-attempt checkpoints for agent resume.

use crate::build::BuildId;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};

/// Information captured between attempts to enable resume.
///
/// `files_before` records what was present at checkpoint time, not files the
/// session went on to create; the retry prompt uses it to tell the agent
/// what already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildCheckpoint {
    pub build_id: BuildId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub files_before: Vec<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    /// Attempt the checkpoint was taken after.
    pub attempt: u32,
    pub saved_at_ms: u64,
}

impl BuildCheckpoint {
    pub fn has_files(&self) -> bool {
        !self.files_before.is_empty()
    }
}
