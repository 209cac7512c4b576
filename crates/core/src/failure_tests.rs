// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    validation = { FailureKind::ValidationError, false },
    access = { FailureKind::AccessDenied, false },
    not_found = { FailureKind::ProjectNotFound, false },
    system_config = { FailureKind::SystemConfigError, false },
    usage_limit = { FailureKind::UsageLimitExceeded { reset_at_ms: None }, false },
    balance = { FailureKind::InsufficientBalance, false },
    timeout = { FailureKind::AgentTimeout, true },
    agent = { FailureKind::AgentError, true },
    schema = { FailureKind::SchemaDrift, false },
    deploy = { FailureKind::DeployFailed, true },
    canceled = { FailureKind::Canceled, false },
)]
fn retry_policy(kind: FailureKind, retryable: bool) {
    assert_eq!(kind.is_retryable(), retryable);
}

#[test]
fn only_config_and_usage_limit_trip_the_pause() {
    assert!(FailureKind::SystemConfigError.trips_limit_pause());
    assert!(FailureKind::UsageLimitExceeded {
        reset_at_ms: Some(9000)
    }
    .trips_limit_pause());
    assert!(!FailureKind::AgentTimeout.trips_limit_pause());
    assert!(!FailureKind::InsufficientBalance.trips_limit_pause());
}

#[test]
fn kind_tag_matches_the_boundary_string() {
    let json = serde_json::to_value(FailureKind::UsageLimitExceeded {
        reset_at_ms: Some(12_000),
    })
    .unwrap();
    assert_eq!(json["kind"], "usage_limit_exceeded");
    assert_eq!(json["reset_at_ms"], 12_000);

    let json = serde_json::to_value(FailureKind::SchemaDrift).unwrap();
    assert_eq!(json["kind"], "schema_drift");
}

#[test]
fn display_matches_as_str() {
    assert_eq!(FailureKind::AgentTimeout.to_string(), "agent_timeout");
    assert_eq!(
        FailureKind::UsageLimitExceeded { reset_at_ms: None }.to_string(),
        "usage_limit_exceeded"
    );
}
