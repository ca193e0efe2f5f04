//! Demonstrates driving the default balancer to a fixpoint across a
//! membership change, printing each round's decisions.

use std::collections::BTreeSet;

use anyhow::Result;
use slotbalance::{for_replicas, NaivePolicy, ServerId, SlotTableBuilder};
use tracing::info;

fn run_to_fixpoint(
    balancer: &dyn slotbalance::SlotBalancer,
    builder: &mut SlotTableBuilder,
    members: &BTreeSet<ServerId>,
) -> Result<u32> {
    let mut rounds = 0;
    while let Some(table) = balancer.balance(builder, members)? {
        rounds += 1;
        info!(round = rounds, epoch = table.epoch(), "balance round applied");
    }
    Ok(rounds)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let slot_num = 16;
    let slot_replicas = 3;

    let mut members: BTreeSet<ServerId> = ["a", "b", "c"].iter().map(|s| ServerId::new(*s)).collect();
    let mut builder = SlotTableBuilder::new(slot_num, slot_replicas);
    let policy = Box::new(NaivePolicy::for_slot_num(slot_num));
    let balancer = for_replicas(slot_replicas, policy);

    let rounds = run_to_fixpoint(&*balancer, &mut builder, &members)?;
    println!("converged from empty seed in {rounds} rounds");

    members.insert(ServerId::new("d"));
    let rounds = run_to_fixpoint(&*balancer, &mut builder, &members)?;
    println!("converged after server join in {rounds} rounds");

    for server in &members {
        let node = builder.get_data_node_slot(server);
        println!(
            "{server}: leads {} slots, follows {} slots",
            node.leader_count(),
            node.follower_count()
        );
    }

    Ok(())
}
