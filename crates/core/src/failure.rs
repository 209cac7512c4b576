// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy for the worker plane.
//!
//! Workers translate caught errors into one of these kinds before reporting
//! to the queue runtime. Unrecoverable kinds are a distinct classification:
//! the runtime must not retry them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged failure classification.
///
/// Serializes as `{"kind": "usage_limit_exceeded", ...}` so the kind string
/// matches what boundary layers surface to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad input; rejected at the boundary, never enqueued.
    ValidationError,
    AccessDenied,
    ProjectNotFound,
    /// Pre-flight found the environment broken (binary missing, EACCES).
    /// Pauses the queue.
    SystemConfigError,
    /// Upstream usage limit. Pauses the queue until the reset time.
    UsageLimitExceeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_at_ms: Option<u64>,
    },
    InsufficientBalance,
    AgentTimeout,
    AgentError,
    /// Metadata response no longer matches the expected schema.
    SchemaDrift,
    DeployFailed,
    /// Terminally canceled (rollback window, admin action).
    Canceled,
}

impl FailureKind {
    /// Whether the queue runtime may retry a job that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::AgentTimeout | FailureKind::AgentError | FailureKind::DeployFailed
        )
    }

    /// Whether this failure should trip the limit controller into pausing
    /// the queue runtime.
    pub fn trips_limit_pause(&self) -> bool {
        matches!(
            self,
            FailureKind::SystemConfigError | FailureKind::UsageLimitExceeded { .. }
        )
    }

    /// Stable string used in timeline payloads and admin surfaces.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationError => "validation_error",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::ProjectNotFound => "project_not_found",
            FailureKind::SystemConfigError => "system_config_error",
            FailureKind::UsageLimitExceeded { .. } => "usage_limit_exceeded",
            FailureKind::InsufficientBalance => "insufficient_balance",
            FailureKind::AgentTimeout => "agent_timeout",
            FailureKind::AgentError => "agent_error",
            FailureKind::SchemaDrift => "schema_drift",
            FailureKind::DeployFailed => "deploy_failed",
            FailureKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
