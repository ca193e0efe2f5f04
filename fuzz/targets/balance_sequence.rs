#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use slotbalance::{for_replicas, NaivePolicy, ServerId, SlotTableBuilder};

const SERVER_POOL: [&str; 8] = ["s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7"];

#[derive(Debug, Arbitrary)]
enum MembershipOp {
    Join(u8),
    Leave(u8),
}

#[derive(Debug, Arbitrary)]
struct Input {
    slot_num_log2: u8,
    slot_replicas: u8,
    ops: Vec<MembershipOp>,
}

fn drive(
    balancer: &dyn slotbalance::SlotBalancer,
    builder: &mut SlotTableBuilder,
    members: &BTreeSet<ServerId>,
) {
    if members.is_empty() {
        return;
    }
    for _ in 0..slot_round_cap(builder) {
        match balancer.balance(builder, members) {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => break,
        }
    }
}

fn slot_round_cap(builder: &SlotTableBuilder) -> usize {
    builder.get_slot_nums() as usize * 4 + 16
}

fuzz_target!(|input: Input| {
    let slot_num: u16 = 1u16 << (input.slot_num_log2 % 7); // 1..=64
    let slot_replicas = (input.slot_replicas % 4) as usize + 1; // 1..=4

    let mut builder = SlotTableBuilder::new(slot_num, slot_replicas);
    let policy = Box::new(NaivePolicy::for_slot_num(slot_num));
    let balancer = for_replicas(slot_replicas, policy);
    let mut members: BTreeSet<ServerId> = BTreeSet::new();

    for op in input.ops.iter().take(64) {
        match op {
            MembershipOp::Join(idx) => {
                members.insert(ServerId::new(SERVER_POOL[*idx as usize % SERVER_POOL.len()]));
            }
            MembershipOp::Leave(idx) => {
                members.remove(&ServerId::new(SERVER_POOL[*idx as usize % SERVER_POOL.len()]));
            }
        }
        drive(&*balancer, &mut builder, &members);
    }

    if members.is_empty() {
        return;
    }

    let table = builder.build();
    for slot in 0..slot_num {
        let assignment = table.assignment(slot).unwrap();
        if let Some(leader) = assignment.leader() {
            assert!(members.contains(leader));
            for follower in assignment.followers() {
                assert_ne!(follower, leader);
                assert!(members.contains(follower));
            }
        }
        assert!(assignment.follower_count() <= slot_replicas.saturating_sub(1));
    }
});
