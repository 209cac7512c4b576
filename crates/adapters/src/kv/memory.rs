// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory key/value backend implementing all three ports.

use super::{IdempotencyStore, KvError, Lease, RateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    count: u64,
    expires_at: Instant,
}

/// Process-local backend. Expiry is lazy (checked on access).
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryKvState>>,
}

#[derive(Default)]
struct MemoryKvState {
    entries: HashMap<String, Entry>,
    unavailable: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (tests of fail-open/fail-closed policy).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    fn check_available(state: &MemoryKvState) -> Result<(), KvError> {
        if state.unavailable {
            return Err(KvError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    fn purge_expired(state: &mut MemoryKvState, now: Instant) {
        state.entries.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl RateLimiter for MemoryKv {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, KvError> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        Self::purge_expired(&mut state, now);

        let entry = state.entries.entry(key.to_string()).or_insert(Entry {
            value: String::new(),
            count: 0,
            // TTL armed on first increment only
            expires_at: now + ttl,
        });
        entry.count += 1;
        Ok(entry.count)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryKv {
    async fn get_or_put(
        &self,
        key: &str,
        ttl: Duration,
        value: String,
    ) -> Result<String, KvError> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        Self::purge_expired(&mut state, now);

        let entry = state.entries.entry(key.to_string()).or_insert(Entry {
            value,
            count: 0,
            expires_at: now + ttl,
        });
        Ok(entry.value.clone())
    }
}

#[async_trait]
impl Lease for MemoryKv {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        Self::purge_expired(&mut state, now);

        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: "held".into(),
                count: 0,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        Self::purge_expired(&mut state, now);

        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.inner.lock();
        Self::check_available(&state)?;
        state.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
