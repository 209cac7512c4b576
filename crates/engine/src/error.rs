// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use thiserror::Error;
use wf_core::SinkError;

/// Errors that can occur in the runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("access denied for user {user} on project {project}")]
    AccessDenied { user: String, project: String },
    #[error("status write failed: {0}")]
    StatusWriteFailed(String),
    #[error("operation tracking failed: {0}")]
    OperationTrackingFailed(String),
    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),
    #[error("invalid cron schedule: {0}")]
    InvalidSchedule(String),
    #[error("bus error: {0}")]
    Bus(#[from] wf_bus::BusError),
    #[error("agent error: {0}")]
    Agent(#[from] wf_adapters::AgentError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
