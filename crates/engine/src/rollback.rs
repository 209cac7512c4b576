// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rollback lease guard.
//!
//! A rollback holds a TTL lease keyed by project. A renewal task extends it
//! at half-TTL so a slow rollback never loses the lock mid-flight, and the
//! lease is released explicitly on exit (with a best-effort release on drop
//! as the backstop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wf_adapters::kv::{KvError, Lease};
use wf_core::ProjectId;

/// Exclusive hold on a project's rollback lock.
pub struct RollbackGuard {
    key: String,
    lease: Arc<dyn Lease>,
    released: Arc<AtomicBool>,
    renewal: JoinHandle<()>,
}

impl RollbackGuard {
    fn lease_key(project_id: &ProjectId) -> String {
        format!("rollback:{project_id}")
    }

    /// Try to take the rollback lock. `None` when another rollback holds it.
    pub async fn acquire(
        lease: Arc<dyn Lease>,
        project_id: &ProjectId,
        ttl: Duration,
    ) -> Result<Option<Self>, KvError> {
        let key = Self::lease_key(project_id);
        if !lease.acquire(&key, ttl).await? {
            return Ok(None);
        }

        let released = Arc::new(AtomicBool::new(false));
        let renewal = {
            let lease = Arc::clone(&lease);
            let key = key.clone();
            let released = Arc::clone(&released);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(ttl / 2).await;
                    if released.load(Ordering::SeqCst) {
                        break;
                    }
                    match lease.renew(&key, ttl).await {
                        Ok(true) => debug!(key, "rollback lease renewed"),
                        Ok(false) => {
                            warn!(key, "rollback lease lost, stopping renewal");
                            break;
                        }
                        Err(e) => {
                            warn!(key, error = %e, "rollback lease renewal failed");
                        }
                    }
                }
            })
        };

        Ok(Some(Self {
            key,
            lease,
            released,
            renewal,
        }))
    }

    /// Explicit release (the finally-scope path).
    pub async fn release(self) -> Result<(), KvError> {
        self.released.store(true, Ordering::SeqCst);
        self.renewal.abort();
        self.lease.release(&self.key).await
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.renewal.abort();
        // Best-effort async release; explicit release() is the real path
        let lease = Arc::clone(&self.lease);
        let key = self.key.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = lease.release(&key).await;
            });
        }
    }
}

#[cfg(test)]
#[path = "rollback_tests.rs"]
mod tests;
