// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn appended_messages_keep_seq_order() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MessageAppended {
        message: message("m2", 2),
    });
    state.apply_event(&Event::MessageAppended {
        message: message("m1", 1),
    });

    let timeline = &state.messages["p1"];
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].seq, 1);
    assert_eq!(timeline[1].seq, 2);
    assert_eq!(state.next_message_seq, 3);
}

#[test]
fn appending_the_same_id_twice_is_a_noop() {
    let mut state = MaterializedState::default();
    let event = Event::MessageAppended {
        message: message("m1", 1),
    };
    state.apply_event(&event);
    state.apply_event(&event);
    assert_eq!(state.messages["p1"].len(), 1);
}

#[test]
fn at_most_one_assistant_reply_per_parent() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MessageAppended {
        message: message("m1", 1),
    });
    state.apply_event(&Event::MessageAppended {
        message: wf_core::test_support::assistant_reply("r1", "p1", 2, "m1"),
    });
    // A second replica loses the race; the row is rejected
    state.apply_event(&Event::MessageAppended {
        message: wf_core::test_support::assistant_reply("r2", "p1", 3, "m1"),
    });

    let timeline = &state.messages["p1"];
    assert_eq!(timeline.len(), 2);
    assert_eq!(
        state.assistant_reply_for("p1", "m1").unwrap().id.as_str(),
        "r1"
    );
}

#[test]
fn assistant_replies_to_different_parents_coexist() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MessageAppended {
        message: message("m1", 1),
    });
    state.apply_event(&Event::MessageAppended {
        message: message("m2", 2),
    });
    state.apply_event(&Event::MessageAppended {
        message: wf_core::test_support::assistant_reply("r1", "p1", 3, "m1"),
    });
    state.apply_event(&Event::MessageAppended {
        message: wf_core::test_support::assistant_reply("r2", "p1", 4, "m2"),
    });
    assert_eq!(state.messages["p1"].len(), 4);
}

#[test]
fn messages_after_is_the_replay_cursor() {
    let mut state = MaterializedState::default();
    for (id, seq) in [("m1", 1), ("m2", 2), ("m3", 3)] {
        state.apply_event(&Event::MessageAppended {
            message: message(id, seq),
        });
    }
    let replay = state.messages_after("p1", 1);
    assert_eq!(replay.len(), 2);
    assert_eq!(replay[0].seq, 2);

    assert!(state.messages_after("p1", 3).is_empty());
    assert!(state.messages_after("unknown", 0).is_empty());
}

#[test]
fn mark_delivered_is_idempotent() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MessageAppended {
        message: message("m1", 1),
    });
    let delivered = Event::MessageDelivered {
        id: MessageId::new("m1"),
    };
    state.apply_event(&delivered);
    state.apply_event(&delivered);
    assert!(state.messages["p1"][0].delivered);
}
