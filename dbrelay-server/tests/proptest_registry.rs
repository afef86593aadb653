//! Property tests: delivery follows membership for any interleaving of
//! join, leave and broadcast.

use std::collections::HashSet;

use dbrelay_server::{BroadcastRegistry, SessionId};
use proptest::prelude::*;
use tokio::sync::mpsc;

const GROUP: &str = "db_changes";
const SLOTS: usize = 5;

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
    Broadcast,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SLOTS).prop_map(Op::Join),
        (0..SLOTS).prop_map(Op::Leave),
        Just(Op::Broadcast),
    ]
}

proptest! {
    #[test]
    fn delivery_matches_membership(ops in prop::collection::vec(op(), 0..64)) {
        let registry = BroadcastRegistry::<u32>::new();
        let ids: Vec<SessionId> = (0..SLOTS).map(|_| SessionId::new()).collect();
        let mut outboxes = Vec::new();
        let mut inboxes = Vec::new();
        for _ in 0..SLOTS {
            let (tx, rx) = mpsc::channel(128);
            outboxes.push(tx);
            inboxes.push(rx);
        }

        let mut members = HashSet::new();
        let mut expected: Vec<Vec<u32>> = vec![Vec::new(); SLOTS];
        let mut next_event = 0u32;

        for op in ops {
            match op {
                Op::Join(slot) => {
                    let joined = registry.join(GROUP, ids[slot], outboxes[slot].clone());
                    prop_assert_eq!(joined, members.insert(slot));
                }
                Op::Leave(slot) => {
                    let left = registry.leave(GROUP, ids[slot]);
                    prop_assert_eq!(left, members.remove(&slot));
                }
                Op::Broadcast => {
                    let report = registry.broadcast(GROUP, &next_event);
                    prop_assert_eq!(report.delivered, members.len());
                    for &slot in &members {
                        expected[slot].push(next_event);
                    }
                    next_event += 1;
                }
            }
            prop_assert_eq!(registry.member_count(GROUP), members.len());
        }

        for (slot, inbox) in inboxes.iter_mut().enumerate() {
            let mut received = Vec::new();
            while let Ok(event) = inbox.try_recv() {
                received.push(event);
            }
            prop_assert_eq!(&received, &expected[slot]);
        }
    }
}
