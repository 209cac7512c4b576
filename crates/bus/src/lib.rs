// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-bus: per-project progress fan-out over a durable message timeline.
//!
//! Two surfaces per project channel:
//! - **durable**: `message.new` / `message.replay`, carrying `seq` and `id`,
//!   persisted through the event sink and replayable by last-seen seq;
//! - **ephemeral**: progress, typing, presence. No seq, no id.
//!
//! The bus is the sole allocator of timeline sequence numbers. Subscribers
//! hold a private channel created and destroyed 1:1 with client
//! connections.

pub mod coalesce;
pub mod wire;

pub use coalesce::Coalescer;
pub use wire::{EventData, WireEvent, SYSTEM_USER};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wf_core::{
    ActorType, BuildId, ChatMode, Clock, Event, EventSink, IdGen, Message, MessageId, ProjectId,
    SinkError, UuidIdGen,
};
use wf_storage::MaterializedState;

/// Buffered events per subscriber before the bus starts dropping.
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// A durable timeline publish.
#[derive(Debug, Clone)]
pub struct DurablePublish {
    pub project_id: ProjectId,
    /// Author shown on the wire; `system` for worker-originated messages.
    pub user_id: String,
    pub actor: ActorType,
    pub mode: ChatMode,
    pub parent_message_id: Option<MessageId>,
    pub build_id: Option<BuildId>,
    pub body: String,
    pub response: Option<Value>,
}

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<WireEvent>,
}

type ChannelMap = Arc<Mutex<HashMap<String, Vec<SubscriberEntry>>>>;

/// A private subscription to one project channel.
///
/// Dropping it detaches from the channel.
pub struct Subscription {
    rx: mpsc::Receiver<WireEvent>,
    id: u64,
    channel: String,
    channels: ChannelMap,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<WireEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = self.channels.lock();
        if let Some(entries) = channels.get_mut(&self.channel) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                channels.remove(&self.channel);
            }
        }
    }
}

/// Ordered durable timeline plus ephemeral event fan-out, keyed by project.
pub struct ProgressBus<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    channels: ChannelMap,
    next_subscriber_id: AtomicU64,
    ids: UuidIdGen,
    /// Serializes durable publishes: seq allocation and the duplicate
    /// assistant-reply check must be atomic with the record.
    publish_lock: Mutex<()>,
}

impl<C: Clock> ProgressBus<C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        clock: C,
    ) -> Self {
        Self {
            state,
            sink,
            clock,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(1),
            ids: UuidIdGen,
            publish_lock: Mutex::new(()),
        }
    }

    fn channel_name(project_id: &ProjectId) -> String {
        format!("chat:{project_id}")
    }

    /// Attach a private subscription to `chat:{projectId}`.
    pub fn subscribe(&self, project_id: &ProjectId) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let channel = Self::channel_name(project_id);
        self.channels
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(SubscriberEntry { id, tx });
        Subscription {
            rx,
            id,
            channel,
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn subscriber_count(&self, project_id: &ProjectId) -> usize {
        self.channels
            .lock()
            .get(&Self::channel_name(project_id))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Append to the durable timeline and fan out `message.new`.
    ///
    /// Losing the duplicate-assistant-reply race is a success: the existing
    /// row comes back as this call's result, with nothing re-published.
    pub fn publish_durable(&self, publish: DurablePublish) -> Result<Message, BusError> {
        let _guard = self.publish_lock.lock();

        if publish.actor == ActorType::Assistant {
            if let Some(parent) = &publish.parent_message_id {
                let state = self.state.lock();
                if let Some(existing) =
                    state.assistant_reply_for(publish.project_id.as_str(), parent.as_str())
                {
                    debug!(
                        project_id = %publish.project_id,
                        parent = %parent,
                        "assistant reply already exists, returning it"
                    );
                    return Ok(existing.clone());
                }
            }
        }

        let seq = {
            let state = self.state.lock();
            state.next_message_seq.max(1)
        };
        let message = Message {
            id: MessageId::new(self.ids.next()),
            project_id: publish.project_id.clone(),
            seq,
            actor: publish.actor,
            mode: publish.mode,
            parent_message_id: publish.parent_message_id,
            build_id: publish.build_id,
            body: publish.body,
            response: publish.response,
            delivered: false,
            created_at_ms: self.clock.epoch_ms(),
        };

        self.sink.record(Event::MessageAppended {
            message: message.clone(),
        })?;

        self.fan_out(
            &publish.project_id,
            self.message_wire("message.new", &message, &publish.user_id),
        );
        Ok(message)
    }

    /// Fan out an ephemeral event. Nothing is persisted.
    pub fn publish_ephemeral(
        &self,
        project_id: &ProjectId,
        event: &str,
        user_id: &str,
        payload: Map<String, Value>,
    ) {
        let wire = WireEvent::ephemeral(
            event,
            project_id.clone(),
            user_id,
            self.clock.epoch_ms(),
            payload,
        );
        self.fan_out(project_id, wire);
    }

    /// Timeline entries after `seq`, as `message.replay` wire events.
    pub fn replay(&self, project_id: &ProjectId, after_seq: u64) -> Vec<WireEvent> {
        let state = self.state.lock();
        state
            .messages_after(project_id.as_str(), after_seq)
            .into_iter()
            .map(|m| self.message_wire("message.replay", m, SYSTEM_USER))
            .collect()
    }

    /// Mark a timeline message delivered. Safe to repeat.
    pub fn mark_delivered(&self, id: &MessageId) -> Result<(), BusError> {
        self.sink.record(Event::MessageDelivered { id: id.clone() })?;
        Ok(())
    }

    fn message_wire(&self, event: &str, message: &Message, user_id: &str) -> WireEvent {
        let mut payload = Map::new();
        payload.insert("body".into(), Value::from(message.body.clone()));
        payload.insert("actor".into(), Value::from(message.actor.to_string()));
        if let Some(parent) = &message.parent_message_id {
            payload.insert("parentMessageId".into(), Value::from(parent.to_string()));
        }
        if let Some(build) = &message.build_id {
            payload.insert("buildId".into(), Value::from(build.to_string()));
        }
        if let Some(response) = &message.response {
            payload.insert("response".into(), response.clone());
        }
        WireEvent::durable(
            event,
            message.project_id.clone(),
            user_id,
            message.created_at_ms,
            message.seq,
            message.id.to_string(),
            payload,
        )
    }

    fn fan_out(&self, project_id: &ProjectId, wire: WireEvent) {
        let mut channels = self.channels.lock();
        let Some(entries) = channels.get_mut(&Self::channel_name(project_id)) else {
            return;
        };
        entries.retain(|entry| match entry.tx.try_send(wire.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(project_id = %project_id, subscriber = entry.id, "subscriber lagging, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
