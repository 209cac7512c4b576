// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global rate-limit state.

use serde::{Deserialize, Serialize};

/// Singleton record describing an upstream-imposed pause.
///
/// While `active`, the queue runtime dispatches nothing; `reset_at_ms` is
/// when the limit controller auto-resumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RateLimitState {
    /// Seconds until reset, for `Retry-After`-style surfaces. Zero when the
    /// reset time has already passed.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        match self.reset_at_ms {
            Some(reset) if reset > now_ms => (reset - now_ms).div_ceil(1000),
            _ => 0,
        }
    }
}
