// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn short_truncates_long_strings() {
    assert_eq!("abcdef".short(3), "abc");
}

#[test]
fn short_returns_whole_string_when_short_enough() {
    assert_eq!("ab".short(3), "ab");
    assert_eq!("abc".short(3), "abc");
}

#[test]
fn uuid_gen_produces_unique_ids() {
    let gen = UuidIdGen;
    let a = gen.next();
    let b = gen.next();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn ulid_gen_produces_26_char_sortable_ids() {
    let gen = UlidIdGen;
    let a = gen.next();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = gen.next();
    assert_eq!(a.len(), 26);
    assert_eq!(b.len(), 26);
    // Later ulids sort after earlier ones
    assert!(b > a);
}

#[test]
fn sequential_gen_counts_up() {
    let gen = SequentialIdGen::new("build");
    assert_eq!(gen.next(), "build-1");
    assert_eq!(gen.next(), "build-2");
}

#[test]
fn sequential_gen_clones_share_the_counter() {
    let gen = SequentialIdGen::new("x");
    let clone = gen.clone();
    assert_eq!(gen.next(), "x-1");
    assert_eq!(clone.next(), "x-2");
}
