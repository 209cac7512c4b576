// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable timeline messages.

use crate::build::BuildId;
use crate::project::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Stable identifier of a timeline message.
    pub struct MessageId;
}

/// Who authored a timeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Client,
    Assistant,
    System,
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorType::Client => write!(f, "client"),
            ActorType::Assistant => write!(f, "assistant"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// Conversation mode the message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Plan,
    Build,
}

/// One entry in a project's durable timeline.
///
/// `seq` is allocated process-wide by the event bus and is the source of
/// truth for Last-Event-ID replay. At most one assistant reply may exist per
/// `(project_id, parent_message_id)`; the storage layer enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub project_id: ProjectId,
    pub seq: u64,
    pub actor: ActorType,
    pub mode: ChatMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<BuildId>,
    pub body: String,
    /// Structured response payload (recommendations, build_failed details…).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default)]
    pub delivered: bool,
    pub created_at_ms: u64,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
