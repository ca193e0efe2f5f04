//! Integration tests for the six literal balancing scenarios.

use std::collections::BTreeMap;

use slotbalance::{for_replicas, NaivePolicy, ServerId, SlotBalancer, SlotTableBuilder};

fn member_set(ids: &[&str]) -> std::collections::BTreeSet<ServerId> {
    ids.iter().map(|s| ServerId::new(*s)).collect()
}

fn drive(
    balancer: &dyn SlotBalancer,
    builder: &mut SlotTableBuilder,
    members: &std::collections::BTreeSet<ServerId>,
) -> u32 {
    let mut rounds = 0;
    while balancer.balance(builder, members).unwrap().is_some() {
        rounds += 1;
        assert!(rounds < 10_000, "did not converge");
    }
    rounds
}

#[test]
fn s1_trivial_placement() {
    let mut builder = SlotTableBuilder::new(4, 1);
    let policy = Box::new(NaivePolicy::for_slot_num(4));
    let balancer = for_replicas(1, policy);
    let members = member_set(&["A"]);

    let table = balancer.balance(&mut builder, &members).unwrap().unwrap();
    assert_eq!(table.epoch(), 1);
    for slot in 0..4 {
        assert_eq!(table.leader(slot).unwrap().as_str(), "A");
        assert_eq!(table.assignment(slot).unwrap().follower_count(), 0);
    }
    assert!(balancer.balance(&mut builder, &members).unwrap().is_none());
}

#[test]
fn s2_balanced_three_way_replicas_two() {
    let mut builder = SlotTableBuilder::new(6, 2);
    let policy = Box::new(NaivePolicy::for_slot_num(6));
    let balancer = for_replicas(2, policy);
    let members = member_set(&["A", "B", "C"]);

    drive(&*balancer, &mut builder, &members);

    let mut leader_counts: BTreeMap<ServerId, usize> = BTreeMap::new();
    let mut follower_counts: BTreeMap<ServerId, usize> = BTreeMap::new();
    for server in &members {
        let node = builder.get_data_node_slot(server);
        leader_counts.insert(server.clone(), node.leader_count());
        follower_counts.insert(server.clone(), node.follower_count());

        for leader_slot in node.leaders() {
            assert!(!node.is_follower_of(leader_slot));
        }
    }
    for count in leader_counts.values() {
        assert_eq!(*count, 2);
    }
    for count in follower_counts.values() {
        assert_eq!(*count, 2);
    }
}

#[test]
fn s3_server_join() {
    let mut builder = SlotTableBuilder::new(6, 2);
    let policy: Box<dyn slotbalance::BalancePolicy> = Box::new(NaivePolicy::for_slot_num(6));
    let balancer = for_replicas(2, policy);
    let mut members = member_set(&["A", "B", "C"]);
    drive(&*balancer, &mut builder, &members);

    members.insert(ServerId::new("D"));
    let rounds_before = builder.epoch();
    drive(&*balancer, &mut builder, &members);
    assert!(builder.epoch() > rounds_before);

    for server in &members {
        let node = builder.get_data_node_slot(server);
        assert!((1..=2).contains(&node.leader_count()));
        assert!((1..=2).contains(&node.follower_count()));
    }
}

#[test]
fn s4_server_leave() {
    let mut builder = SlotTableBuilder::new(6, 2);
    let policy = Box::new(NaivePolicy::for_slot_num(6));
    let balancer = for_replicas(2, policy);
    let mut members = member_set(&["A", "B", "C"]);
    drive(&*balancer, &mut builder, &members);

    members.remove(&ServerId::new("C"));
    drive(&*balancer, &mut builder, &members);

    for server in &members {
        let node = builder.get_data_node_slot(server);
        assert_eq!(node.leader_count(), 3);
        assert_eq!(node.follower_count(), 3);
    }
}

#[test]
fn s5_no_progress_on_balanced_table() {
    let mut builder = SlotTableBuilder::new(6, 2);
    let policy = Box::new(NaivePolicy::for_slot_num(6));
    let balancer = for_replicas(2, policy);
    let members = member_set(&["A", "B", "C"]);

    drive(&*balancer, &mut builder, &members);
    assert!(balancer.balance(&mut builder, &members).unwrap().is_none());
}

#[test]
fn s6_replica_one_degenerate() {
    let mut builder = SlotTableBuilder::new(8, 1);
    let policy = Box::new(NaivePolicy::for_slot_num(8));
    let balancer = for_replicas(1, policy);
    let members = member_set(&["A", "B", "C"]);

    drive(&*balancer, &mut builder, &members);

    let mut counts: Vec<usize> = members
        .iter()
        .map(|s| builder.get_data_node_slot(s).leader_count())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 3, 3]);
}
