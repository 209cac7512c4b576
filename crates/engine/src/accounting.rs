// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock accounting of agent time against per-user balances.
//!
//! The stream worker starts a meter before spawning the agent and settles
//! it when the attempt ends. Failed attempts are refunded (charged zero).
//! Settling is safe to call at most once per running meter; a later attempt
//! restarts the clock.

use crate::error::RuntimeError;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use wf_core::{BuildId, Clock, Event, EventSink, SinkError, UserId};
use wf_storage::MaterializedState;

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("insufficient balance for {user_id}: {balance_secs}s")]
    InsufficientBalance { user_id: UserId, balance_secs: i64 },
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Meters agent wall-clock time per build.
pub struct Accountant<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
}

impl<C: Clock> Accountant<C> {
    pub fn new(state: Arc<Mutex<MaterializedState>>, sink: Arc<dyn EventSink>, clock: C) -> Self {
        Self { state, sink, clock }
    }

    /// Credit a user's balance (admin/provisioning surface).
    pub fn grant(&self, user_id: &UserId, seconds: i64) -> Result<(), RuntimeError> {
        self.sink.record(Event::BalanceGranted {
            user_id: user_id.clone(),
            seconds,
        })?;
        Ok(())
    }

    pub fn balance_secs(&self, user_id: &UserId) -> i64 {
        self.state.lock().balance_secs(user_id.as_str())
    }

    /// Pre-flight check plus meter start.
    ///
    /// Fails when the user has no remaining agent time. Idempotent per
    /// build: re-begin on a running meter keeps the original start.
    pub fn begin(&self, build_id: &BuildId, user_id: &UserId) -> Result<(), AccountingError> {
        let balance = self.balance_secs(user_id);
        if balance <= 0 {
            return Err(AccountingError::InsufficientBalance {
                user_id: user_id.clone(),
                balance_secs: balance,
            });
        }
        self.sink.record(Event::MeterStarted {
            build_id: build_id.clone(),
            user_id: user_id.clone(),
            at_ms: self.clock.epoch_ms(),
        })?;
        Ok(())
    }

    /// Settle the meter. Successful attempts charge elapsed wall-clock
    /// seconds; failures refund (charge zero). Calling it again after the
    /// meter settled is a no-op.
    pub fn end(&self, build_id: &BuildId, success: bool) -> Result<(), AccountingError> {
        let now = self.clock.epoch_ms();
        let started_at_ms = {
            let state = self.state.lock();
            match state.meters.get(build_id.as_str()) {
                Some(meter) if !meter.ended => meter.started_at_ms,
                _ => {
                    debug!(build_id = %build_id, "meter already settled or missing, skipping");
                    return Ok(());
                }
            }
        };

        let charged_secs = if success {
            (now.saturating_sub(started_at_ms)).div_ceil(1000) as i64
        } else {
            0
        };
        self.sink.record(Event::MeterEnded {
            build_id: build_id.clone(),
            at_ms: now,
            charged_secs,
            refunded: !success,
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "accounting_tests.rs"]
mod tests;
