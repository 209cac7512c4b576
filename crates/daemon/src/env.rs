// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon environment configuration.

use std::path::PathBuf;

/// State directory: `WF_STATE_DIR`, else `~/.local/state/webforge`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WF_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("webforge")
}

/// Log directory: `WF_LOG_DIR`, else `{state_dir}/logs`.
pub fn log_dir() -> PathBuf {
    std::env::var("WF_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join("logs"))
}

/// Agent binary: `WF_AGENT_BIN`, else `agent` on PATH.
pub fn agent_binary() -> PathBuf {
    std::env::var("WF_AGENT_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("agent"))
}

/// Preview base URL for the static publisher: `WF_PREVIEW_BASE_URL`.
pub fn preview_base_url() -> String {
    std::env::var("WF_PREVIEW_BASE_URL")
        .unwrap_or_else(|_| "https://preview.localhost".to_string())
}
