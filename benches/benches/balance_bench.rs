use std::{collections::BTreeSet, hint::black_box};

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use slotbalance::{for_replicas, NaivePolicy, ServerId, SlotTableBuilder};

fn members(n: usize) -> BTreeSet<ServerId> {
    (0..n).map(|i| ServerId::new(format!("srv-{i:04}"))).collect()
}

fn converge(slot_num: u16, slot_replicas: usize, server_count: usize) {
    let members = members(server_count);
    let mut builder = SlotTableBuilder::new(slot_num, slot_replicas);
    let policy = Box::new(NaivePolicy::for_slot_num(slot_num));
    let balancer = for_replicas(slot_replicas, policy);

    while balancer
        .balance(black_box(&mut builder), black_box(&members))
        .unwrap()
        .is_some()
    {}
}

fn bench_default_balancer_cold_start(c: &mut Criterion) {
    c.bench_function("default_balancer 4096 slots, 3 replicas, 32 servers", |b| {
        b.iter(|| converge(4096, 3, 32));
    });
}

fn bench_default_balancer_large_membership(c: &mut Criterion) {
    c.bench_function("default_balancer 4096 slots, 3 replicas, 256 servers", |b| {
        b.iter(|| converge(4096, 3, 256));
    });
}

fn bench_leader_only_balancer(c: &mut Criterion) {
    c.bench_function("leader_only_balancer 4096 slots, 32 servers", |b| {
        b.iter(|| converge(4096, 1, 32));
    });
}

fn bench_server_join_incremental(c: &mut Criterion) {
    let initial = members(32);
    let mut builder = SlotTableBuilder::new(4096, 3);
    let policy = Box::new(NaivePolicy::for_slot_num(4096));
    let balancer = for_replicas(3, policy);
    while balancer.balance(&mut builder, &initial).unwrap().is_some() {}

    c.bench_function("default_balancer single server join, 4096 slots", |b| {
        b.iter(|| {
            let mut grown = initial.clone();
            grown.insert(ServerId::new("srv-new"));
            let mut builder = builder.clone();
            while balancer
                .balance(black_box(&mut builder), black_box(&grown))
                .unwrap()
                .is_some()
            {}
        });
    });
}

fn bench_default_balancer_membership_churn(c: &mut Criterion) {
    let pool = members(64);
    let mut rng = SmallRng::seed_from_u64(0xA11CE);

    c.bench_function("default_balancer 4096 slots, 32-of-64 random churn", |b| {
        b.iter(|| {
            let mut shuffled: Vec<ServerId> = pool.iter().cloned().collect();
            shuffled.shuffle(&mut rng);
            let members: BTreeSet<ServerId> = shuffled.into_iter().take(32).collect();

            let mut builder = SlotTableBuilder::new(4096, 3);
            let policy = Box::new(NaivePolicy::for_slot_num(4096));
            let balancer = for_replicas(3, policy);
            while balancer
                .balance(black_box(&mut builder), black_box(&members))
                .unwrap()
                .is_some()
            {}
        });
    });
}

criterion_group!(
    benches,
    bench_default_balancer_cold_start,
    bench_default_balancer_large_membership,
    bench_leader_only_balancer,
    bench_server_join_incremental,
    bench_default_balancer_membership_churn,
);
criterion_main!(benches);
