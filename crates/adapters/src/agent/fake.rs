// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake agent for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{AgentError, AgentInvocation, AgentOutcome, AgentRecord, BuildAgent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use wf_core::SessionId;

/// Recorded call to [`FakeAgent`]
#[derive(Debug, Clone)]
pub enum AgentCall {
    Preflight {
        cwd: PathBuf,
    },
    Run {
        prompt: String,
        cwd: PathBuf,
        resume_session: Option<SessionId>,
        deadline_secs: u64,
    },
}

/// Fake agent adapter.
///
/// Scripted outcomes are served FIFO; when the script runs dry the agent
/// returns a plain success with session `fake-session`. All calls are
/// recorded for assertions.
#[derive(Clone, Default)]
pub struct FakeAgent {
    inner: Arc<Mutex<FakeAgentState>>,
}

#[derive(Default)]
struct FakeAgentState {
    outcomes: VecDeque<AgentOutcome>,
    records: Vec<AgentRecord>,
    calls: Vec<AgentCall>,
    preflight_error: Option<AgentError>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next run.
    pub fn push_outcome(&self, outcome: AgentOutcome) {
        self.inner.lock().outcomes.push_back(outcome);
    }

    /// Records streamed to `progress` on every run.
    pub fn set_records(&self, records: Vec<AgentRecord>) {
        self.inner.lock().records = records;
    }

    /// Fail the next preflight.
    pub fn set_preflight_error(&self, error: AgentError) {
        self.inner.lock().preflight_error = Some(error);
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.inner.lock().calls.clone()
    }

    /// Prompts of every recorded run, in order.
    pub fn run_prompts(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                AgentCall::Run { prompt, .. } => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    /// A ready-made success outcome.
    pub fn success(session_id: &str) -> AgentOutcome {
        AgentOutcome {
            success: true,
            session_id: Some(SessionId::new(session_id)),
            input_tokens: 120,
            output_tokens: 60,
            cost_usd: 0.05,
            files_written: vec!["index.html".into()],
            result_data: None,
            error: None,
            stderr_tail: String::new(),
            duration_ms: 1_500,
            resumed: false,
        }
    }

    /// A ready-made failure outcome.
    pub fn failure(failure: super::AgentFailure) -> AgentOutcome {
        AgentOutcome {
            success: false,
            error: Some(failure),
            duration_ms: 700,
            ..AgentOutcome::default()
        }
    }
}

#[async_trait::async_trait]
impl BuildAgent for FakeAgent {
    async fn preflight(&self, cwd: &Path) -> Result<(), AgentError> {
        let mut inner = self.inner.lock();
        inner.calls.push(AgentCall::Preflight {
            cwd: cwd.to_path_buf(),
        });
        match inner.preflight_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        invocation: AgentInvocation,
        progress: Option<mpsc::Sender<AgentRecord>>,
    ) -> Result<AgentOutcome, AgentError> {
        let (outcome, records) = {
            let mut inner = self.inner.lock();
            inner.calls.push(AgentCall::Run {
                prompt: invocation.prompt.clone(),
                cwd: invocation.cwd.clone(),
                resume_session: invocation.resume_session.clone(),
                deadline_secs: invocation.deadline.as_secs(),
            });
            let outcome = inner
                .outcomes
                .pop_front()
                .unwrap_or_else(|| Self::success("fake-session"));
            (outcome, inner.records.clone())
        };

        if let Some(tx) = progress {
            for record in records {
                let _ = tx.send(record).await;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
