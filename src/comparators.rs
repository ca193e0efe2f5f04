//! Deterministic total orderings over server ids (spec.md §4.2).
//!
//! Every comparator here is tie-broken by the server id's own lexicographic
//! order, which is the single mechanism that keeps repeated balancer runs
//! on identical input byte-identical.

use crate::{builder::SlotTableBuilder, ids::ServerId};

fn leader_count(builder: &SlotTableBuilder, server: &ServerId) -> usize {
    builder.get_data_node_slot(server).leader_count()
}

fn follower_count(builder: &SlotTableBuilder, server: &ServerId) -> usize {
    builder.get_data_node_slot(server).follower_count()
}

/// Sorts `servers` by descending leader count, ties broken by id.
pub fn sort_most_leaders_first(builder: &SlotTableBuilder, servers: &mut [ServerId]) {
    servers.sort_by(|a, b| {
        leader_count(builder, b)
            .cmp(&leader_count(builder, a))
            .then_with(|| a.cmp(b))
    });
}

/// Sorts `servers` by ascending leader count, ties broken by id.
pub fn sort_least_leaders_first(builder: &SlotTableBuilder, servers: &mut [ServerId]) {
    servers.sort_by(|a, b| {
        leader_count(builder, a)
            .cmp(&leader_count(builder, b))
            .then_with(|| a.cmp(b))
    });
}

/// Sorts `servers` by descending follower count, ties broken by id.
pub fn sort_most_followers_first(builder: &SlotTableBuilder, servers: &mut [ServerId]) {
    servers.sort_by(|a, b| {
        follower_count(builder, b)
            .cmp(&follower_count(builder, a))
            .then_with(|| a.cmp(b))
    });
}

/// Sorts `servers` by ascending follower count, ties broken by id.
pub fn sort_least_followers_first(builder: &SlotTableBuilder, servers: &mut [ServerId]) {
    servers.sort_by(|a, b| {
        follower_count(builder, a)
            .cmp(&follower_count(builder, b))
            .then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_by_id() {
        let builder = SlotTableBuilder::new(4, 1);
        let mut servers = vec![ServerId::new("b"), ServerId::new("a"), ServerId::new("c")];
        sort_most_leaders_first(&builder, &mut servers);
        assert_eq!(
            servers,
            vec![ServerId::new("a"), ServerId::new("b"), ServerId::new("c")]
        );
    }
}
