// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build operation records: the idempotency primitive.

use crate::build::BuildId;
use crate::project::ProjectId;
use crate::version::VersionId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Caller-chosen idempotency key binding retries to one logical
    /// operation. Independent of any request-tracing correlation id.
    pub struct OperationId;
}

/// Mapping from `(project_id, operation_id)` to the ids minted on first
/// observation. Uniqueness on the pair makes retried requests converge on
/// the same `(build_id, version_id, job_id)` exactly once. Rows are never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOperation {
    pub project_id: ProjectId,
    pub operation_id: OperationId,
    pub build_id: BuildId,
    pub version_id: VersionId,
    /// Patched after successful enqueue; empty means the first call has not
    /// completed enqueue yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub recorded_at_ms: u64,
}

/// Storage key for a build operation.
pub fn operation_key(project_id: &ProjectId, operation_id: &OperationId) -> String {
    format!("{}\u{1f}{}", project_id, operation_id)
}
