// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline configuration.
//!
//! Constructed once at boot and handed to components via DI. Environment
//! variables override the defaults for operational knobs.

use std::path::PathBuf;
use std::time::Duration;
use wf_core::{ProjectId, UserId};

/// Queue names of the fixed pipeline.
pub const STAGE_ONE_QUEUE: &str = "build-stage-one";
pub const METADATA_QUEUE: &str = "metadata";
pub const DEPLOY_QUEUE: &str = "deploy";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which project working directories live
    /// (`{root}/{userId}/{projectId}`).
    pub projects_root: PathBuf,
    /// Hidden metadata directory inside each project.
    pub hidden_dir: String,
    /// Wall-clock budget for the first agent attempt.
    pub initial_timeout: Duration,
    /// Budget for attempts ≥ 2.
    pub retry_timeout: Duration,
    /// Budget for metadata-stage session work.
    pub metadata_timeout: Duration,
    /// Session-id prefix that routes builds through the mock bypass.
    pub mock_session_prefix: String,
    /// Static preview URL recorded for mock sessions.
    pub mock_preview_url: String,
    /// Feature flag: compact the agent session after the metadata stage.
    pub compact_sessions: bool,
    /// Stream worker pool size.
    pub stream_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from("/var/lib/webforge/projects"),
            hidden_dir: ".webforge".to_string(),
            initial_timeout: Duration::from_secs(600),
            retry_timeout: Duration::from_secs(300),
            metadata_timeout: Duration::from_secs(120),
            mock_session_prefix: "mock_session_".to_string(),
            mock_preview_url: "https://preview.invalid/mock".to_string(),
            compact_sessions: false,
            stream_concurrency: 3,
        }
    }
}

impl PipelineConfig {
    /// Apply environment-variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("WF_PROJECTS_ROOT") {
            config.projects_root = PathBuf::from(root);
        }
        if let Some(secs) = env_u64("WF_INITIAL_TIMEOUT_SECS") {
            config.initial_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("WF_RETRY_TIMEOUT_SECS") {
            config.retry_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("WF_METADATA_TIMEOUT_SECS") {
            config.metadata_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("WF_STREAM_CONCURRENCY") {
            config.stream_concurrency = n.max(1) as usize;
        }
        if let Ok(flag) = std::env::var("WF_COMPACT_SESSIONS") {
            config.compact_sessions = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        config
    }

    /// Project working directory (not created on disk here; that is the
    /// stage-one worker's job).
    pub fn project_path(&self, user_id: &UserId, project_id: &ProjectId) -> PathBuf {
        self.projects_root
            .join(user_id.as_str())
            .join(project_id.as_str())
    }

    /// Deadline for an attempt, shaped by whether work already exists.
    pub fn attempt_deadline(&self, attempt: u32, has_files: bool) -> Duration {
        if attempt <= 1 {
            self.initial_timeout
        } else if has_files {
            // Resuming over existing files needs less room than a rebuild
            self.retry_timeout
        } else {
            self.retry_timeout + self.retry_timeout / 2
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
