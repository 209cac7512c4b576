// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state derived from the event log.
//!
//! Events are facts about what happened; state is derived from those facts.
//! An event is applied exactly once per state instance (live via the sink,
//! or during boot replay), but handlers still guard transitions so that a
//! replayed or duplicated event cannot corrupt invariants:
//!
//! - inserts are skipped when the row already exists
//! - counters grow only on a state transition
//! - lifecycle transitions go through [`wf_core::BuildStatus::can_transition_to`]
//! - at most one assistant reply exists per `(project, parent_message_id)`
//! - a Version row is never created for a failed build
//! - `completed_at >= started_at` is clamped at the write

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use wf_core::{
    operation_key, ActorType, Build, BuildCheckpoint, BuildOperation, BuildStatus, Event, JobState,
    Message, Project, QueueJob, RateLimitState, Repeatable, UserId, Version,
};

/// One named queue's durable contents.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueState {
    pub jobs: Vec<QueueJob>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeatables: Vec<Repeatable>,
}

/// Counters for the admin surface.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
    pub paused: bool,
}

/// A wall-clock meter for one build's agent time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meter {
    pub user_id: UserId,
    pub started_at_ms: u64,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub charged_secs: i64,
}

/// A flagged file-placement attempt (audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub project_id: String,
    pub path: String,
}

/// Materialized state built from event replay.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub projects: HashMap<String, Project>,
    pub builds: HashMap<String, Build>,
    pub versions: HashMap<String, Version>,
    /// Keyed by `operation_key(project_id, operation_id)`.
    #[serde(default)]
    pub operations: HashMap<String, BuildOperation>,
    #[serde(default)]
    pub checkpoints: HashMap<String, BuildCheckpoint>,
    /// Timeline per project, ascending by seq.
    #[serde(default)]
    pub messages: HashMap<String, Vec<Message>>,
    /// Next process-wide message sequence number.
    #[serde(default)]
    pub next_message_seq: u64,
    /// Recommendations payload per build id.
    #[serde(default)]
    pub recommendations: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub queues: HashMap<String, QueueState>,
    #[serde(default)]
    pub all_queues_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_pause_reason: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitState,
    /// Per-user agent-time balance in seconds.
    #[serde(default)]
    pub balances: HashMap<String, i64>,
    /// Per-build wall-clock meters, keyed by build id.
    #[serde(default)]
    pub meters: HashMap<String, Meter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_events: Vec<SecurityEvent>,
}

impl MaterializedState {
    pub fn get_project(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn get_build(&self, id: &str) -> Option<&Build> {
        self.builds.get(id)
    }

    pub fn get_version(&self, id: &str) -> Option<&Version> {
        self.versions.get(id)
    }

    pub fn operation(&self, project_id: &str, operation_id: &str) -> Option<&BuildOperation> {
        self.operations.get(&operation_key(
            &wf_core::ProjectId::new(project_id),
            &wf_core::OperationId::new(operation_id),
        ))
    }

    pub fn checkpoint(&self, build_id: &str) -> Option<&BuildCheckpoint> {
        self.checkpoints.get(build_id)
    }

    /// The existing assistant reply for a parent message, if any.
    pub fn assistant_reply_for(&self, project_id: &str, parent_id: &str) -> Option<&Message> {
        self.messages.get(project_id)?.iter().find(|m| {
            m.actor == ActorType::Assistant
                && m.parent_message_id.as_ref().is_some_and(|p| p == parent_id)
        })
    }

    /// Timeline entries with `seq > after`, ascending.
    pub fn messages_after(&self, project_id: &str, after: u64) -> Vec<&Message> {
        self.messages
            .get(project_id)
            .map(|msgs| msgs.iter().filter(|m| m.seq > after).collect())
            .unwrap_or_default()
    }

    pub fn versions_for_project(&self, project_id: &str) -> Vec<&Version> {
        let mut versions: Vec<&Version> = self
            .versions
            .values()
            .filter(|v| v.project_id == project_id)
            .collect();
        versions.sort_by_key(|v| v.display_seq);
        versions
    }

    pub fn job(&self, queue: &str, job_id: &str) -> Option<&QueueJob> {
        self.queues.get(queue)?.jobs.iter().find(|j| j.id == job_id)
    }

    /// Whether a queue may dispatch work right now.
    pub fn queue_dispatchable(&self, queue: &str) -> bool {
        if self.all_queues_paused || self.rate_limit.active {
            return false;
        }
        !self.queues.get(queue).map(|q| q.paused).unwrap_or(false)
    }

    pub fn queue_stats(&self, queue: &str) -> QueueStats {
        let mut stats = QueueStats {
            paused: self.all_queues_paused,
            ..QueueStats::default()
        };
        if let Some(q) = self.queues.get(queue) {
            stats.paused = stats.paused || q.paused;
            for job in &q.jobs {
                match job.state {
                    JobState::Waiting => stats.waiting += 1,
                    JobState::Active => stats.active += 1,
                    JobState::Completed => stats.completed += 1,
                    JobState::Failed => stats.failed += 1,
                    JobState::Dead => stats.dead += 1,
                }
            }
        }
        stats
    }

    pub fn balance_secs(&self, user_id: &str) -> i64 {
        self.balances.get(user_id).copied().unwrap_or(0)
    }

    fn transition_project(&mut self, id: &str, next: BuildStatus) -> bool {
        match self.projects.get_mut(id) {
            Some(project) => {
                let ok = project.transition(next);
                if !ok {
                    warn!(
                        project_id = id,
                        from = ?project.build_status,
                        to = %next,
                        "illegal project transition rejected"
                    );
                }
                ok
            }
            None => {
                warn!(project_id = id, to = %next, "transition for unknown project");
                false
            }
        }
    }

    /// Apply an event to derive state changes.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            // === projects ===
            Event::ProjectCreated {
                id,
                owner_id,
                collaborators,
                created_at_ms,
            } => {
                if !self.projects.contains_key(id.as_str()) {
                    let mut project = Project::new(id.clone(), owner_id.clone(), *created_at_ms);
                    project.collaborators = collaborators.clone();
                    self.projects.insert(id.to_string(), project);
                }
            }

            Event::ProjectQueued { id, build_id } => {
                // FK-tight: current_build_id must reference an existing Build
                if !self.builds.contains_key(build_id.as_str()) {
                    warn!(project_id = %id, build_id = %build_id, "queued with unknown build, ignoring");
                    return;
                }
                if self.transition_project(id.as_str(), BuildStatus::Queued) {
                    if let Some(project) = self.projects.get_mut(id.as_str()) {
                        project.current_build_id = Some(build_id.clone());
                    }
                }
            }

            Event::ProjectBuilding {
                id,
                build_id,
                started_at_ms,
            } => {
                if self.transition_project(id.as_str(), BuildStatus::Building) {
                    if let Some(project) = self.projects.get_mut(id.as_str()) {
                        project.current_build_id = Some(build_id.clone());
                        project.last_build_started_ms = Some(*started_at_ms);
                        // Clear the prior completion timestamp for the new run
                        project.last_build_completed_ms = None;
                    }
                }
            }

            Event::ProjectDeployed {
                id,
                build_id: _,
                preview_url,
                lane: _,
                completed_at_ms,
            } => {
                if self.transition_project(id.as_str(), BuildStatus::Deployed) {
                    if let Some(project) = self.projects.get_mut(id.as_str()) {
                        project.preview_url = Some(preview_url.clone());
                        let at = match project.last_build_started_ms {
                            Some(started) if *completed_at_ms < started => started,
                            _ => *completed_at_ms,
                        };
                        project.last_build_completed_ms = Some(at);
                    }
                }
            }

            Event::ProjectFailed {
                id,
                build_id: _,
                completed_at_ms,
            } => {
                if self.transition_project(id.as_str(), BuildStatus::Failed) {
                    if let Some(project) = self.projects.get_mut(id.as_str()) {
                        let at = match project.last_build_started_ms {
                            Some(started) if *completed_at_ms < started => started,
                            _ => *completed_at_ms,
                        };
                        project.last_build_completed_ms = Some(at);
                    }
                }
            }

            Event::ProjectRollingBack { id } => {
                self.transition_project(id.as_str(), BuildStatus::RollingBack);
            }

            Event::ProjectRollbackDone { id } => {
                self.transition_project(id.as_str(), BuildStatus::Deployed);
            }

            Event::ProjectRollbackFailed { id } => {
                self.transition_project(id.as_str(), BuildStatus::RollbackFailed);
            }

            Event::ProjectSessionUpdated { id, session_id } => {
                if let Some(project) = self.projects.get_mut(id.as_str()) {
                    project.last_session_id = Some(session_id.clone());
                }
            }

            // === build operations ===
            Event::OperationRecorded {
                project_id,
                operation_id,
                build_id,
                version_id,
                at_ms,
            } => {
                let key = operation_key(project_id, operation_id);
                // Conflict-do-nothing: the first mapping wins, forever
                self.operations.entry(key).or_insert_with(|| BuildOperation {
                    project_id: project_id.clone(),
                    operation_id: operation_id.clone(),
                    build_id: build_id.clone(),
                    version_id: version_id.clone(),
                    job_id: None,
                    recorded_at_ms: *at_ms,
                });
            }

            Event::OperationJobPatched {
                project_id,
                operation_id,
                job_id,
            } => {
                let key = operation_key(project_id, operation_id);
                if let Some(op) = self.operations.get_mut(&key) {
                    op.job_id = Some(job_id.clone());
                }
            }

            // === builds ===
            Event::BuildCreated {
                id,
                project_id,
                created_at_ms,
            } => {
                if !self.builds.contains_key(id.as_str()) {
                    self.builds.insert(
                        id.to_string(),
                        Build::new(id.clone(), project_id.clone(), *created_at_ms),
                    );
                }
            }

            Event::BuildAttemptStarted { id, attempt, at_ms } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.start_attempt(*attempt, *at_ms);
                }
            }

            Event::BuildSessionIdentified { id, session_id } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.session_id = Some(session_id.clone());
                }
            }

            Event::BuildAttemptFailed {
                id,
                attempt: _,
                kind,
                error,
                stderr_tail,
                at_ms: _,
            } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.last_error = Some(error.clone());
                    build.failure_kind = Some(kind.clone());
                    if let Some(tail) = stderr_tail {
                        build.set_stderr_tail(tail);
                    }
                }
            }

            Event::BuildAiCompleted {
                id,
                completed_at_ms,
            } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.complete(wf_core::BuildStage::AiCompleted, *completed_at_ms);
                }
            }

            Event::BuildFailed {
                id,
                kind,
                error,
                completed_at_ms,
            } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.last_error = Some(error.clone());
                    build.failure_kind = Some(kind.clone());
                    build.complete(wf_core::BuildStage::Failed, *completed_at_ms);
                }
            }

            Event::BuildDeployed {
                id,
                completed_at_ms,
            } => {
                if let Some(build) = self.builds.get_mut(id.as_str()) {
                    build.complete(wf_core::BuildStage::Deployed, *completed_at_ms);
                }
            }

            // === versions ===
            Event::VersionCreated {
                id,
                project_id,
                build_id,
                display_seq,
                session_id,
                created_at_ms,
            } => {
                // No version for a failed build, ever
                match self.builds.get(build_id.as_str()) {
                    None => {
                        warn!(version_id = %id, build_id = %build_id, "version for unknown build, ignoring");
                        return;
                    }
                    Some(build) if build.status == wf_core::BuildStage::Failed => {
                        warn!(version_id = %id, build_id = %build_id, "version for failed build, ignoring");
                        return;
                    }
                    Some(_) => {}
                }
                if !self.versions.contains_key(id.as_str()) {
                    let mut version = Version::new(
                        id.clone(),
                        project_id.clone(),
                        build_id.clone(),
                        *display_seq,
                        *created_at_ms,
                    );
                    version.session_id = session_id.clone();
                    self.versions.insert(id.to_string(), version);
                }
                if let Some(project) = self.projects.get_mut(project_id.as_str()) {
                    project.current_version_id = Some(id.clone());
                    project.version_counter = project.version_counter.max(*display_seq);
                }
            }

            Event::VersionSemanticsSet {
                version_id,
                major,
                minor,
                patch,
                change_type,
            } => {
                if let Some(version) = self.versions.get_mut(version_id.as_str()) {
                    // set_semantics leaves display_name alone
                    version.set_semantics(*major, *minor, *patch, *change_type);
                }
            }

            // === checkpoints ===
            Event::CheckpointSaved { checkpoint } => {
                self.checkpoints
                    .insert(checkpoint.build_id.to_string(), checkpoint.clone());
            }

            // === timeline ===
            Event::MessageAppended { message } => {
                let timeline = self
                    .messages
                    .entry(message.project_id.to_string())
                    .or_default();
                if timeline.iter().any(|m| m.id == message.id) {
                    return;
                }
                // Unique (project, parent) constraint for assistant replies
                if message.actor == ActorType::Assistant {
                    if let Some(parent) = &message.parent_message_id {
                        let duplicate = timeline.iter().any(|m| {
                            m.actor == ActorType::Assistant
                                && m.parent_message_id.as_ref() == Some(parent)
                        });
                        if duplicate {
                            warn!(
                                project_id = %message.project_id,
                                parent = %parent,
                                "duplicate assistant reply rejected"
                            );
                            return;
                        }
                    }
                }
                timeline.push(message.clone());
                timeline.sort_by_key(|m| m.seq);
                self.next_message_seq = self.next_message_seq.max(message.seq + 1);
            }

            Event::MessageDelivered { id } => {
                for timeline in self.messages.values_mut() {
                    if let Some(message) = timeline.iter_mut().find(|m| m.id == *id) {
                        message.delivered = true;
                        return;
                    }
                }
            }

            // === metadata ===
            Event::RecommendationsRecorded {
                project_id: _,
                build_id,
                version_id: _,
                payload,
            } => {
                self.recommendations
                    .entry(build_id.to_string())
                    .or_insert_with(|| payload.clone());
            }

            // === queues ===
            Event::JobEnqueued { job } => {
                let queue = self.queues.entry(job.queue.clone()).or_default();
                // Idempotent enqueue: a second enqueue with the same id is a no-op
                if !queue.jobs.iter().any(|j| j.id == job.id) {
                    queue.jobs.push(job.clone());
                }
            }

            Event::JobStarted {
                queue,
                job_id,
                attempt,
                at_ms: _,
            } => {
                if let Some(job) = Self::job_mut(&mut self.queues, queue, job_id.as_str()) {
                    job.state = JobState::Active;
                    job.attempt = job.attempt.max(*attempt);
                }
            }

            Event::JobCompleted { queue, job_id } => {
                let mut retention = None;
                if let Some(job) = Self::job_mut(&mut self.queues, queue, job_id.as_str()) {
                    job.state = JobState::Completed;
                    retention = Some(job.remove_on_complete);
                }
                if let Some(keep) = retention {
                    Self::prune(&mut self.queues, queue, JobState::Completed, keep);
                }
            }

            Event::JobFailed {
                queue,
                job_id,
                error,
                kind,
                retry_at_ms,
            } => {
                let mut retention = None;
                if let Some(job) = Self::job_mut(&mut self.queues, queue, job_id.as_str()) {
                    job.error = Some(error.clone());
                    job.failure_kind = kind.clone();
                    match retry_at_ms {
                        Some(at) => {
                            job.state = JobState::Waiting;
                            job.run_at_ms = *at;
                        }
                        None => {
                            job.state = JobState::Failed;
                            retention = Some(job.remove_on_fail);
                        }
                    }
                }
                if let Some(keep) = retention {
                    Self::prune(&mut self.queues, queue, JobState::Failed, keep);
                }
            }

            Event::JobDead {
                queue,
                job_id,
                kind,
                error,
            } => {
                let mut retention = None;
                if let Some(job) = Self::job_mut(&mut self.queues, queue, job_id.as_str()) {
                    job.state = JobState::Dead;
                    job.error = Some(error.clone());
                    job.failure_kind = Some(kind.clone());
                    retention = Some(job.remove_on_fail);
                }
                if let Some(keep) = retention {
                    Self::prune(&mut self.queues, queue, JobState::Dead, keep);
                }
            }

            Event::JobDeferred {
                queue,
                job_id,
                run_at_ms,
                attempt,
            } => {
                if let Some(job) = Self::job_mut(&mut self.queues, queue, job_id.as_str()) {
                    job.state = JobState::Waiting;
                    job.run_at_ms = *run_at_ms;
                    job.attempt = *attempt;
                }
            }

            Event::QueuePaused { queue, reason } => match queue {
                Some(name) => {
                    let entry = self.queues.entry(name.clone()).or_default();
                    entry.paused = true;
                    entry.pause_reason = Some(reason.clone());
                }
                None => {
                    self.all_queues_paused = true;
                    self.global_pause_reason = Some(reason.clone());
                }
            },

            Event::QueueResumed { queue } => match queue {
                Some(name) => {
                    if let Some(entry) = self.queues.get_mut(name) {
                        entry.paused = false;
                        entry.pause_reason = None;
                    }
                }
                None => {
                    self.all_queues_paused = false;
                    self.global_pause_reason = None;
                }
            },

            Event::RepeatableAdded { repeatable } => {
                let queue = self.queues.entry(repeatable.queue.clone()).or_default();
                // Stable identity: reboots must not multiply the schedule
                if !queue
                    .repeatables
                    .iter()
                    .any(|r| r.identity() == repeatable.identity())
                {
                    queue.repeatables.push(repeatable.clone());
                }
            }

            Event::RepeatableFired { queue, name, at_ms } => {
                if let Some(entry) = self.queues.get_mut(queue) {
                    if let Some(repeatable) =
                        entry.repeatables.iter_mut().find(|r| r.name == *name)
                    {
                        repeatable.last_fired_at_ms = Some(*at_ms);
                    }
                }
            }

            // === limit controller ===
            Event::LimitTripped {
                reason,
                reset_at_ms,
            } => {
                self.rate_limit = RateLimitState {
                    active: true,
                    reset_at_ms: *reset_at_ms,
                    reason: Some(reason.clone()),
                };
            }

            Event::LimitCleared => {
                self.rate_limit = RateLimitState::default();
            }

            // === accounting ===
            Event::BalanceGranted { user_id, seconds } => {
                *self.balances.entry(user_id.to_string()).or_insert(0) += seconds;
            }

            Event::MeterStarted {
                build_id,
                user_id,
                at_ms,
            } => {
                let fresh = Meter {
                    user_id: user_id.clone(),
                    started_at_ms: *at_ms,
                    ended: false,
                    charged_secs: 0,
                };
                match self.meters.get_mut(build_id.as_str()) {
                    // A new attempt after a settled meter restarts the clock;
                    // a running meter is left alone (idempotent begin)
                    Some(meter) if meter.ended => *meter = fresh,
                    Some(_) => {}
                    None => {
                        self.meters.insert(build_id.to_string(), fresh);
                    }
                }
            }

            Event::MeterEnded {
                build_id,
                at_ms: _,
                charged_secs,
                refunded: _,
            } => {
                if let Some(meter) = self.meters.get_mut(build_id.as_str()) {
                    // Guarded by the ended flag: end is safe to apply at most once
                    if !meter.ended {
                        meter.ended = true;
                        meter.charged_secs = *charged_secs;
                        *self
                            .balances
                            .entry(meter.user_id.to_string())
                            .or_insert(0) -= charged_secs;
                    }
                }
            }

            // === security ===
            Event::SecurityFileFlagged { project_id, path } => {
                let entry = SecurityEvent {
                    project_id: project_id.to_string(),
                    path: path.clone(),
                };
                if self.security_events.last() != Some(&entry) {
                    self.security_events.push(entry);
                }
            }

            // Runtime plumbing with no persisted state
            Event::TimerFired { .. } | Event::Shutdown | Event::Custom => {}
        }
    }

    fn job_mut<'a>(
        queues: &'a mut HashMap<String, QueueState>,
        queue: &str,
        job_id: &str,
    ) -> Option<&'a mut QueueJob> {
        queues.get_mut(queue)?.jobs.iter_mut().find(|j| j.id == job_id)
    }

    /// Drop the oldest jobs in `state` beyond the retention count.
    fn prune(
        queues: &mut HashMap<String, QueueState>,
        queue: &str,
        state: JobState,
        keep: u32,
    ) {
        let Some(entry) = queues.get_mut(queue) else {
            return;
        };
        let mut in_state: Vec<usize> = entry
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.state == state)
            .map(|(i, _)| i)
            .collect();
        if in_state.len() <= keep as usize {
            return;
        }
        // Oldest first by enqueue time
        in_state.sort_by_key(|&i| entry.jobs[i].enqueued_at_ms);
        let drop_count = in_state.len() - keep as usize;
        let drop_ids: Vec<String> = in_state
            .iter()
            .take(drop_count)
            .map(|&i| entry.jobs[i].id.to_string())
            .collect();
        entry.jobs.retain(|j| !drop_ids.contains(&j.id.to_string()));
    }
}

#[cfg(test)]
#[path = "state_tests/mod.rs"]
mod tests;
