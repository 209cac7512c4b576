// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value ports for throttling, idempotency caching, and leasing.
//!
//! Each port is the minimum viable surface; implementations are pluggable
//! (in-memory here, Redis or equivalent in larger deployments). Callers own
//! the failure policy: per-IP/user throttles fail open when the store is
//! unavailable, the rollback lease fails closed.

mod memory;
pub use memory::MemoryKv;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the key/value backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Incr-with-TTL counter for rate limiting.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Increment `key` and return the new count. The first increment arms a
    /// TTL; the counter disappears when it expires.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, KvError>;
}

/// Get-or-put cache for request idempotency.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Store `value` under `key` unless one exists; returns the stored
    /// value either way.
    async fn get_or_put(&self, key: &str, ttl: Duration, value: String)
        -> Result<String, KvError>;
}

/// TTL-based exclusive lease (rollback lock).
#[async_trait]
pub trait Lease: Send + Sync {
    /// Try to take the lease. False when someone else holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Extend a held lease. False when it expired or was taken over.
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Release the lease. Must be called from a finally-scope on exit.
    async fn release(&self, key: &str) -> Result<(), KvError>;
}
