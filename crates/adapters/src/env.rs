// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-variable overrides for adapter tunables.

use std::time::Duration;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Grace window between SIGTERM and SIGKILL (`WF_KILL_GRACE_MS`).
pub fn kill_grace() -> Duration {
    Duration::from_millis(env_u64("WF_KILL_GRACE_MS").unwrap_or(5_000))
}

/// Agent preflight probe timeout (`WF_PREFLIGHT_TIMEOUT_MS`).
pub fn preflight_timeout() -> Duration {
    Duration::from_millis(env_u64("WF_PREFLIGHT_TIMEOUT_MS").unwrap_or(10_000))
}
