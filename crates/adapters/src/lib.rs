// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-adapters: outbound integrations for the worker plane
//!
//! - `agent`: code-generation agent supervision (child process, NDJSON)
//! - `kv`: throttle / idempotency / lease ports with an in-memory backend
//! - `publish`: artifact publication port
//! - `subprocess`: timeout-wrapped subprocess helpers

pub mod agent;
pub mod env;
pub mod kv;
pub mod publish;
pub mod subprocess;

pub use agent::{
    AgentError, AgentFailure, AgentInvocation, AgentOutcome, AgentRecord, BuildAgent,
    ProcessAgent,
};
#[cfg(any(test, feature = "test-support"))]
pub use agent::{AgentCall, FakeAgent};
pub use kv::{IdempotencyStore, KvError, Lease, MemoryKv, RateLimiter};
#[cfg(any(test, feature = "test-support"))]
pub use publish::FakePublisher;
pub use publish::{Lane, PublishError, PublishRequest, PublishedSite, Publisher, StaticSitePublisher};
pub use subprocess::run_with_timeout;
