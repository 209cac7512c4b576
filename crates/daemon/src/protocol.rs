// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound protocol DTOs.
//!
//! The HTTP layer validates and authenticates requests before they reach
//! these types; the daemon only implements the narrow contracts. Responses
//! mirror the boundary's error taxonomy (`retry_after_secs` maps to a
//! `Retry-After` header upstream).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use wf_core::{ChatMode, RateLimitState};
use wf_storage::QueueStats;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateBuild {
        user_id: String,
        project_id: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        framework: Option<String>,
        #[serde(default)]
        is_initial_build: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_locale: Option<String>,
    },

    ChatMessage {
        project_id: String,
        user_id: String,
        /// Client-chosen id; doubles as the idempotency key for builds the
        /// message triggers.
        client_msg_id: String,
        mode: ChatMode,
        text: String,
    },

    AdminPause {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until_ms: Option<u64>,
    },

    AdminResume,

    AdminHealth,

    DeployCallback {
        deployment_id: String,
        /// `success` or anything else (treated as failure).
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        project_id: String,
        build_id: String,
        version_id: String,
        project_path: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Build {
        build_id: String,
        version_id: String,
        job_id: String,
        status: String,
        project_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Message {
        id: String,
        seq: u64,
    },

    Ack,

    Health(HealthEnvelope),

    Error {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

impl HealthStatus {
    /// HTTP-style status code for the admin surface.
    pub fn http_code(self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded | HealthStatus::Error => 503,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEnvelope {
    pub status: HealthStatus,
    pub queues: HashMap<String, QueueStats>,
    pub rate_limit: RateLimitState,
    pub projects: usize,
    pub builds_in_flight: usize,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
