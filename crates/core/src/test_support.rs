// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared builders for tests across the workspace.
#![cfg_attr(coverage_nightly, coverage(off))]
#![allow(clippy::unwrap_used)]

use crate::build::{Build, BuildId};
use crate::event::Event;
use crate::message::{ActorType, ChatMode, Message, MessageId};
use crate::project::{Project, ProjectId, UserId};
use crate::version::{Version, VersionId};

/// A project owned by `u1`, created at t=1000.
pub fn project(id: &str) -> Project {
    Project::new(ProjectId::new(id), UserId::new("u1"), 1_000)
}

/// The event that creates [`project`] in materialized state.
pub fn project_created(id: &str) -> Event {
    Event::ProjectCreated {
        id: ProjectId::new(id),
        owner_id: UserId::new("u1"),
        collaborators: Vec::new(),
        created_at_ms: 1_000,
    }
}

pub fn build(id: &str, project_id: &str) -> Build {
    Build::new(BuildId::new(id), ProjectId::new(project_id), 1_000)
}

pub fn version(id: &str, project_id: &str, build_id: &str, display_seq: u32) -> Version {
    Version::new(
        VersionId::new(id),
        ProjectId::new(project_id),
        BuildId::new(build_id),
        display_seq,
        1_000,
    )
}

pub fn client_message(id: &str, project_id: &str, seq: u64, body: &str) -> Message {
    Message {
        id: MessageId::new(id),
        project_id: ProjectId::new(project_id),
        seq,
        actor: ActorType::Client,
        mode: ChatMode::Build,
        parent_message_id: None,
        build_id: None,
        body: body.to_string(),
        response: None,
        delivered: false,
        created_at_ms: 1_000,
    }
}

pub fn assistant_reply(id: &str, project_id: &str, seq: u64, parent: &str) -> Message {
    Message {
        id: MessageId::new(id),
        project_id: ProjectId::new(project_id),
        seq,
        actor: ActorType::Assistant,
        mode: ChatMode::Build,
        parent_message_id: Some(MessageId::new(parent)),
        build_id: None,
        body: "ok".to_string(),
        response: None,
        delivered: false,
        created_at_ms: 1_000,
    }
}
