// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use wf_core::UserId;

fn granted(seconds: i64) -> Event {
    Event::BalanceGranted {
        user_id: UserId::new("u1"),
        seconds,
    }
}

#[test]
fn grants_accumulate() {
    let mut state = MaterializedState::default();
    state.apply_event(&granted(600));
    state.apply_event(&granted(300));
    assert_eq!(state.balance_secs("u1"), 900);
    assert_eq!(state.balance_secs("unknown"), 0);
}

#[test]
fn meter_charges_on_end() {
    let mut state = MaterializedState::default();
    state.apply_event(&granted(600));
    state.apply_event(&Event::MeterStarted {
        build_id: BuildId::new("b1"),
        user_id: UserId::new("u1"),
        at_ms: 10_000,
    });
    state.apply_event(&Event::MeterEnded {
        build_id: BuildId::new("b1"),
        at_ms: 55_000,
        charged_secs: 45,
        refunded: false,
    });

    assert_eq!(state.balance_secs("u1"), 555);
    assert!(state.meters["b1"].ended);
    assert_eq!(state.meters["b1"].charged_secs, 45);
}

#[test]
fn meter_end_is_applied_at_most_once() {
    let mut state = MaterializedState::default();
    state.apply_event(&granted(600));
    state.apply_event(&Event::MeterStarted {
        build_id: BuildId::new("b1"),
        user_id: UserId::new("u1"),
        at_ms: 10_000,
    });
    let end = Event::MeterEnded {
        build_id: BuildId::new("b1"),
        at_ms: 55_000,
        charged_secs: 45,
        refunded: false,
    };
    state.apply_event(&end);
    state.apply_event(&end);
    assert_eq!(state.balance_secs("u1"), 555);
}

#[test]
fn refund_on_failure_charges_nothing() {
    let mut state = MaterializedState::default();
    state.apply_event(&granted(600));
    state.apply_event(&Event::MeterStarted {
        build_id: BuildId::new("b1"),
        user_id: UserId::new("u1"),
        at_ms: 10_000,
    });
    state.apply_event(&Event::MeterEnded {
        build_id: BuildId::new("b1"),
        at_ms: 55_000,
        charged_secs: 0,
        refunded: true,
    });
    assert_eq!(state.balance_secs("u1"), 600);
}

#[test]
fn security_events_are_recorded() {
    let mut state = MaterializedState::default();
    let event = Event::SecurityFileFlagged {
        project_id: ProjectId::new("p1"),
        path: "../worker/secrets.txt".into(),
    };
    state.apply_event(&event);
    state.apply_event(&event); // consecutive duplicate collapses
    assert_eq!(state.security_events.len(), 1);
    assert_eq!(state.security_events[0].path, "../worker/secrets.txt");
}
