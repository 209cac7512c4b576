// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-core: core types for the webforge worker plane

pub mod build;
pub mod checkpoint;
pub mod clock;
pub mod event;
pub mod failure;
pub mod id;
pub mod job;
pub mod limits;
pub mod macros;
pub mod message;
pub mod operation;
pub mod project;
pub mod session;
pub mod sink;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use build::{Build, BuildId, BuildStage, STDERR_TAIL_MAX};
pub use checkpoint::BuildCheckpoint;
pub use clock::{Clock, FakeClock, SystemClock};
pub use event::Event;
pub use failure::FailureKind;
pub use id::{IdGen, SequentialIdGen, ShortId, UlidIdGen, UuidIdGen};
pub use job::{
    exponential_backoff_ms, EnqueueOpts, JobId, JobState, QueueJob, Repeatable, BACKOFF_CAP_MS,
};
pub use limits::RateLimitState;
pub use message::{ActorType, ChatMode, Message, MessageId};
pub use operation::{operation_key, BuildOperation, OperationId};
pub use project::{BuildStatus, Project, ProjectId, UserId};
pub use session::{SessionId, SessionState};
pub use sink::{EventSink, SinkError};
pub use version::{ChangeType, Version, VersionId};
