// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire shape for events published to project channels.
//!
//! Every published event is `{event, data: {projectId, userId, timestamp,
//! …payload}}`. Durable timeline events additionally carry `seq` and `id`;
//! ephemeral events must not, so a subscriber's last-event-id pointer tracks
//! timeline position only. The two constructors make the difference
//! unrepresentable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wf_core::ProjectId;

/// Sender of system-originated events.
pub const SYSTEM_USER: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event: String,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub project_id: ProjectId,
    pub user_id: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Timeline sequence. Durable events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Stable message id. Durable events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl WireEvent {
    /// A durable timeline event (`message.new` / `message.replay`).
    pub fn durable(
        event: impl Into<String>,
        project_id: ProjectId,
        user_id: impl Into<String>,
        timestamp: u64,
        seq: u64,
        id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event: event.into(),
            data: EventData {
                project_id,
                user_id: user_id.into(),
                timestamp,
                seq: Some(seq),
                id: Some(id.into()),
                payload,
            },
        }
    }

    /// An ephemeral event (typing, presence, progress). No seq, no id.
    pub fn ephemeral(
        event: impl Into<String>,
        project_id: ProjectId,
        user_id: impl Into<String>,
        timestamp: u64,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event: event.into(),
            data: EventData {
                project_id,
                user_id: user_id.into(),
                timestamp,
                seq: None,
                id: None,
                payload,
            },
        }
    }

    pub fn is_durable(&self) -> bool {
        self.data.seq.is_some()
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
