// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::fixture;
use wf_core::FakeClock;

fn accountant() -> (Accountant<FakeClock>, FakeClock) {
    let (state, sink, clock) = fixture();
    (
        Accountant::new(state, Arc::new(sink), clock.clone()),
        clock,
    )
}

fn u1() -> UserId {
    UserId::new("u1")
}

fn b1() -> BuildId {
    BuildId::new("b1")
}

#[test]
fn begin_requires_a_positive_balance() {
    let (accountant, _clock) = accountant();
    let err = accountant.begin(&b1(), &u1()).unwrap_err();
    assert!(matches!(
        err,
        AccountingError::InsufficientBalance { balance_secs: 0, .. }
    ));

    accountant.grant(&u1(), 600).unwrap();
    accountant.begin(&b1(), &u1()).unwrap();
}

#[test]
fn successful_attempt_charges_elapsed_seconds() {
    let (accountant, clock) = accountant();
    accountant.grant(&u1(), 600).unwrap();
    accountant.begin(&b1(), &u1()).unwrap();

    clock.advance_ms(45_000);
    accountant.end(&b1(), true).unwrap();
    assert_eq!(accountant.balance_secs(&u1()), 555);
}

#[test]
fn failed_attempt_is_refunded() {
    let (accountant, clock) = accountant();
    accountant.grant(&u1(), 600).unwrap();
    accountant.begin(&b1(), &u1()).unwrap();

    clock.advance_ms(45_000);
    accountant.end(&b1(), false).unwrap();
    assert_eq!(accountant.balance_secs(&u1()), 600);
}

#[test]
fn end_is_safe_to_call_at_most_once() {
    let (accountant, clock) = accountant();
    accountant.grant(&u1(), 600).unwrap();
    accountant.begin(&b1(), &u1()).unwrap();

    clock.advance_ms(10_000);
    accountant.end(&b1(), true).unwrap();
    clock.advance_ms(60_000);
    accountant.end(&b1(), true).unwrap();
    accountant.end(&b1(), false).unwrap();

    assert_eq!(accountant.balance_secs(&u1()), 590);
}

#[test]
fn end_without_begin_is_a_noop() {
    let (accountant, _clock) = accountant();
    accountant.end(&b1(), true).unwrap();
}

#[test]
fn a_retry_attempt_restarts_the_meter() {
    let (accountant, clock) = accountant();
    accountant.grant(&u1(), 600).unwrap();

    // Attempt 1 fails and is refunded
    accountant.begin(&b1(), &u1()).unwrap();
    clock.advance_ms(30_000);
    accountant.end(&b1(), false).unwrap();

    // Attempt 2 meters from its own start
    accountant.begin(&b1(), &u1()).unwrap();
    clock.advance_ms(20_000);
    accountant.end(&b1(), true).unwrap();

    assert_eq!(accountant.balance_secs(&u1()), 580);
}

#[test]
fn partial_seconds_round_up() {
    let (accountant, clock) = accountant();
    accountant.grant(&u1(), 600).unwrap();
    accountant.begin(&b1(), &u1()).unwrap();
    clock.advance_ms(1_500);
    accountant.end(&b1(), true).unwrap();
    assert_eq!(accountant.balance_secs(&u1()), 598);
}
