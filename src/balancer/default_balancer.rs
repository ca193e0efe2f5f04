use std::collections::BTreeSet;

use tracing::{debug, info};

use super::SlotBalancer;
use crate::{
    builder::SlotTableBuilder,
    comparators,
    error::{BalancerError, Result},
    ids::{ServerId, SlotId},
    policy::BalancePolicy,
    slot_table::SlotTable,
};

fn ceil_div(a: usize, b: usize) -> usize {
    a / b + usize::from(a % b != 0)
}

/// The four-phase balancer for `slot_replicas >= 2` (spec.md §4.5).
///
/// Each `balance()` call runs exactly one phase, in order: reduce leader
/// hotspots, reduce follower hotspots, raise follower cold spots, raise
/// leader cold spots. The first phase that changes anything stops the
/// round; callers invoke `balance()` repeatedly until it returns `Ok(None)`.
pub struct DefaultSlotBalancer {
    policy: Box<dyn BalancePolicy>,
}

impl DefaultSlotBalancer {
    pub fn new(policy: Box<dyn BalancePolicy>) -> Self {
        Self { policy }
    }

    /// Phase 1: `balanceLeaderSlots`. Tries `upgradeHighLeaders` first;
    /// falls back to `migrateHighLeaders` only if that moved nothing.
    fn balance_leader_slots(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        leader_ceil: usize,
    ) -> Result<bool> {
        if self.upgrade_high_leaders(builder, members, leader_ceil)? {
            return Ok(true);
        }
        self.migrate_high_leaders(builder, members, leader_ceil)
    }

    fn upgrade_high_leaders(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        leader_ceil: usize,
    ) -> Result<bool> {
        let cap = self.policy.max_move_leader_slots();
        let mut moved = 0usize;
        let mut unsatisfiable: BTreeSet<ServerId> = BTreeSet::new();

        loop {
            if moved >= cap {
                break;
            }
            let mut high = builder.get_data_node_slots_leader_beyond(members, leader_ceil);
            comparators::sort_most_leaders_first(builder, &mut high);
            if high.is_empty() {
                break;
            }

            let near_high =
                builder.get_data_node_slots_leader_beyond(members, leader_ceil.saturating_sub(1));
            let mut excludes: BTreeSet<ServerId> = high.iter().cloned().collect();
            excludes.extend(near_high);

            let mut progressed = false;
            for hot in &high {
                if unsatisfiable.contains(hot) {
                    continue;
                }
                match select_swap_out_candidate(builder, hot, &excludes) {
                    Some((candidate, slot)) => {
                        let prior = builder.replace_leader(slot, candidate.clone())?;
                        if prior.as_ref() != Some(hot) {
                            return Err(BalancerError::InvariantViolation(format!(
                                "expected {hot} to be replaced as leader of slot {slot}, got {prior:?}"
                            )));
                        }
                        builder.add_follower(slot, hot.clone())?;
                        debug!(slot, from = %hot, to = %candidate, phase = "upgrade_high_leaders", "swapped leader");
                        moved += 1;
                        progressed = true;
                        break;
                    }
                    None => {
                        unsatisfiable.insert(hot.clone());
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        Ok(moved > 0)
    }

    fn migrate_high_leaders(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        leader_ceil: usize,
    ) -> Result<bool> {
        let cap = self.policy.max_move_follower_slots();
        let mut moved = 0usize;
        let mut moved_in: BTreeSet<ServerId> = BTreeSet::new();

        let mut high = builder.get_data_node_slots_leader_beyond(members, leader_ceil);
        comparators::sort_most_leaders_first(builder, &mut high);
        if high.is_empty() {
            return Ok(false);
        }

        let near_high =
            builder.get_data_node_slots_leader_beyond(members, leader_ceil.saturating_sub(1));
        let mut excludes: BTreeSet<ServerId> = high.iter().cloned().collect();
        excludes.extend(near_high);

        for hot in &high {
            if moved >= cap {
                break;
            }
            if let Some((from, slot, to)) =
                select_migration_candidate(builder, members, hot, &excludes, &moved_in)
            {
                builder.remove_follower(slot, &from)?;
                builder.add_follower(slot, to.clone())?;
                moved_in.insert(to.clone());
                debug!(slot, from = %from, to = %to, phase = "migrate_high_leaders", "migrated follower");
                moved += 1;
            }
        }

        Ok(moved > 0)
    }

    /// Phase 2: `balanceHighFollowerSlots`.
    fn balance_high_follower_slots(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        follower_ceil: usize,
    ) -> Result<bool> {
        let cap = self.policy.max_move_follower_slots();
        let mut moved = 0usize;

        loop {
            if moved >= cap {
                break;
            }
            let mut high = builder.get_data_node_slots_follower_beyond(members, follower_ceil);
            comparators::sort_most_followers_first(builder, &mut high);
            if high.is_empty() {
                break;
            }

            let near_high = builder
                .get_data_node_slots_follower_beyond(members, follower_ceil.saturating_sub(1));
            let mut excludes: BTreeSet<ServerId> = high.iter().cloned().collect();
            excludes.extend(near_high);

            let mut progressed = false;
            for hot in &high {
                match select_follower_out_candidate(builder, members, hot, &excludes) {
                    Some((candidate, slot)) => {
                        builder.remove_follower(slot, hot)?;
                        builder.add_follower(slot, candidate.clone())?;
                        debug!(slot, from = %hot, to = %candidate, phase = "balance_high_followers", "moved follower");
                        moved += 1;
                        progressed = true;
                        break;
                    }
                    None => {
                        debug!(server = %hot, phase = "balance_high_followers", "no viable candidate");
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        Ok(moved > 0)
    }

    /// Phase 3: `balanceLowFollowerSlots`, the mirror image of phase 2.
    fn balance_low_follower_slots(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        follower_floor: usize,
    ) -> Result<bool> {
        let cap = self.policy.max_move_follower_slots();
        let mut moved = 0usize;

        loop {
            if moved >= cap {
                break;
            }
            let mut low = builder.get_data_node_slots_follower_below(members, follower_floor);
            comparators::sort_least_followers_first(builder, &mut low);
            if low.is_empty() {
                break;
            }

            let near_low =
                builder.get_data_node_slots_follower_below(members, follower_floor + 1);
            let mut excludes: BTreeSet<ServerId> = low.iter().cloned().collect();
            excludes.extend(near_low);

            let mut progressed = false;
            for cold in &low {
                match select_follower_in_candidate(builder, members, cold, &excludes) {
                    Some((donor, slot)) => {
                        builder.remove_follower(slot, &donor)?;
                        builder.add_follower(slot, cold.clone())?;
                        debug!(slot, from = %donor, to = %cold, phase = "balance_low_followers", "moved follower");
                        moved += 1;
                        progressed = true;
                        break;
                    }
                    None => {
                        debug!(server = %cold, phase = "balance_low_followers", "no viable donor");
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        Ok(moved > 0)
    }

    /// Phase 4: `balanceLowLeaders`, the mirror image of `upgradeHighLeaders`.
    fn balance_low_leaders(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
        leader_floor: usize,
    ) -> Result<bool> {
        let cap = self.policy.max_move_leader_slots();
        let mut moved = 0usize;
        let mut unsatisfiable: BTreeSet<ServerId> = BTreeSet::new();

        loop {
            if moved >= cap {
                break;
            }
            let mut low = builder.get_data_node_slots_leader_below(members, leader_floor);
            comparators::sort_least_leaders_first(builder, &mut low);
            if low.is_empty() {
                break;
            }

            let near_low = builder.get_data_node_slots_leader_below(members, leader_floor + 1);
            let mut excludes: BTreeSet<ServerId> = low.iter().cloned().collect();
            excludes.extend(near_low);

            let mut progressed = false;
            for cold in &low {
                if unsatisfiable.contains(cold) {
                    continue;
                }
                match select_swap_in_candidate(builder, cold, &excludes) {
                    Some((old_leader, slot)) => {
                        let prior = builder.replace_leader(slot, cold.clone())?;
                        if prior.as_ref() != Some(&old_leader) {
                            return Err(BalancerError::InvariantViolation(format!(
                                "expected {old_leader} to be replaced as leader of slot {slot}, got {prior:?}"
                            )));
                        }
                        builder.add_follower(slot, old_leader.clone())?;
                        debug!(slot, from = %old_leader, to = %cold, phase = "balance_low_leaders", "swapped leader");
                        moved += 1;
                        progressed = true;
                        break;
                    }
                    None => {
                        unsatisfiable.insert(cold.clone());
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        Ok(moved > 0)
    }
}

/// Picks a follower of one of `hot`'s led slots to swap in as the new
/// leader: the follower (not already hot or near-hot) with fewest current
/// leaders, tie-broken by id; among that follower's eligible slots, the
/// smallest slot id.
fn select_swap_out_candidate(
    builder: &SlotTableBuilder,
    hot: &ServerId,
    excludes: &BTreeSet<ServerId>,
) -> Option<(ServerId, SlotId)> {
    let hot_slots = builder.get_data_node_slot(hot);
    let mut candidates: Vec<(ServerId, SlotId)> = Vec::new();
    for slot in hot_slots.leaders() {
        for follower in builder.get_data_servers_owns_follower(slot) {
            if !excludes.contains(&follower) {
                candidates.push((follower, slot));
            }
        }
    }

    candidates.sort_by(|a, b| {
        let la = builder.get_data_node_slot(&a.0).leader_count();
        let lb = builder.get_data_node_slot(&b.0).leader_count();
        la.cmp(&lb).then_with(|| a.0.cmp(&b.0)).then_with(|| a.1.cmp(&b.1))
    });
    candidates.into_iter().next()
}

/// The mirror of [`select_swap_out_candidate`]: picks a leader of one of
/// `cold`'s followed slots to demote, favoring the leader with the most
/// current leaders, tie-broken by id then smallest slot id.
fn select_swap_in_candidate(
    builder: &SlotTableBuilder,
    cold: &ServerId,
    excludes: &BTreeSet<ServerId>,
) -> Option<(ServerId, SlotId)> {
    let cold_slots = builder.get_data_node_slot(cold);
    let mut candidates: Vec<(ServerId, SlotId)> = Vec::new();
    for slot in cold_slots.followers() {
        if let Some(leader) = builder.get_data_servers_owns_leader(slot) {
            if !excludes.contains(&leader) {
                candidates.push((leader, slot));
            }
        }
    }

    candidates.sort_by(|a, b| {
        let la = builder.get_data_node_slot(&a.0).leader_count();
        let lb = builder.get_data_node_slot(&b.0).leader_count();
        lb.cmp(&la).then_with(|| a.0.cmp(&b.0)).then_with(|| a.1.cmp(&b.1))
    });
    candidates.into_iter().next()
}

/// For `hot`'s led slots, finds a follower not yet moved this round and a
/// non-excluded destination (least-leaders-first) to migrate it to.
fn select_migration_candidate(
    builder: &SlotTableBuilder,
    members: &BTreeSet<ServerId>,
    hot: &ServerId,
    excludes: &BTreeSet<ServerId>,
    moved_in: &BTreeSet<ServerId>,
) -> Option<(ServerId, SlotId, ServerId)> {
    let hot_slots = builder.get_data_node_slot(hot);
    let mut candidates: Vec<(ServerId, SlotId)> = Vec::new();
    for slot in hot_slots.leaders() {
        for follower in builder.get_data_servers_owns_follower(slot) {
            if !moved_in.contains(&follower) {
                candidates.push((follower, slot));
            }
        }
    }
    candidates.sort_by(|a, b| {
        let fa = builder.get_data_node_slot(&a.0).follower_count();
        let fb = builder.get_data_node_slot(&b.0).follower_count();
        fb.cmp(&fa).then_with(|| a.0.cmp(&b.0)).then_with(|| a.1.cmp(&b.1))
    });

    for (from, slot) in candidates {
        let mut destinations: Vec<ServerId> = members
            .iter()
            .filter(|m| !excludes.contains(*m))
            .cloned()
            .collect();
        comparators::sort_least_leaders_first(builder, &mut destinations);
        for to in destinations {
            if to == from {
                continue;
            }
            if builder.get_data_node_slot(&to).is_follower_of(slot) {
                continue;
            }
            return Some((from, slot, to));
        }
    }
    None
}

/// For `hot`'s followed slots (ascending slot id), finds a non-excluded
/// destination (least-followers-first) that neither leads nor follows the
/// slot already.
fn select_follower_out_candidate(
    builder: &SlotTableBuilder,
    members: &BTreeSet<ServerId>,
    hot: &ServerId,
    excludes: &BTreeSet<ServerId>,
) -> Option<(ServerId, SlotId)> {
    let mut slots: Vec<SlotId> = builder.get_data_node_slot(hot).followers().collect();
    slots.sort_unstable();

    for slot in slots {
        let mut candidates: Vec<ServerId> = members
            .iter()
            .filter(|m| !excludes.contains(*m))
            .cloned()
            .collect();
        comparators::sort_least_followers_first(builder, &mut candidates);
        for candidate in candidates {
            if builder.get_data_servers_owns_leader(slot).as_ref() == Some(&candidate) {
                continue;
            }
            if builder.get_data_node_slot(&candidate).is_follower_of(slot) {
                continue;
            }
            return Some((candidate, slot));
        }
    }
    None
}

/// For `cold`, scans non-excluded donors (most-followers-first) and picks
/// one of the donor's followed slots that `cold` neither leads nor follows.
fn select_follower_in_candidate(
    builder: &SlotTableBuilder,
    members: &BTreeSet<ServerId>,
    cold: &ServerId,
    excludes: &BTreeSet<ServerId>,
) -> Option<(ServerId, SlotId)> {
    let mut donors: Vec<ServerId> = members
        .iter()
        .filter(|m| !excludes.contains(*m))
        .cloned()
        .collect();
    comparators::sort_most_followers_first(builder, &mut donors);

    for donor in donors {
        let mut slots: Vec<SlotId> = builder.get_data_node_slot(&donor).followers().collect();
        slots.sort_unstable();
        for slot in slots {
            if builder.get_data_servers_owns_leader(slot).as_ref() == Some(cold) {
                continue;
            }
            if builder.get_data_node_slot(cold).is_follower_of(slot) {
                continue;
            }
            return Some((donor, slot));
        }
    }
    None
}

impl SlotBalancer for DefaultSlotBalancer {
    fn balance(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
    ) -> Result<Option<SlotTable>> {
        if members.is_empty() {
            return Err(BalancerError::NoDataServers);
        }

        let repair_cap = self
            .policy
            .max_move_leader_slots()
            .max(self.policy.max_move_follower_slots());
        if builder.repair_orphaned(members, repair_cap) {
            builder.incr_epoch();
            info!(phase = "repair", "repaired orphaned slots");
            return Ok(Some(builder.build()));
        }

        let n = members.len();
        let slot_num = builder.get_slot_nums() as usize;
        let replicas = builder.get_slot_replicas();
        let leader_ceil = self.policy.high_water_mark_leader(ceil_div(slot_num, n));
        let leader_floor = self.policy.low_water_mark_leader(slot_num / n);
        let follower_total = slot_num * replicas.saturating_sub(1);
        let follower_ceil = self
            .policy
            .high_water_mark_follower(ceil_div(follower_total, n));
        let follower_floor = self.policy.low_water_mark_follower(follower_total / n);

        if self.balance_leader_slots(builder, members, leader_ceil)? {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }
        if self.balance_high_follower_slots(builder, members, follower_ceil)? {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }
        if self.balance_low_follower_slots(builder, members, follower_floor)? {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }
        if self.balance_low_leaders(builder, members, leader_floor)? {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NaivePolicy;

    fn members(ids: &[&str]) -> BTreeSet<ServerId> {
        ids.iter().map(|s| ServerId::new(*s)).collect()
    }

    fn drive_to_convergence(
        balancer: &DefaultSlotBalancer,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
    ) -> SlotTable {
        let mut last = builder.build();
        for _ in 0..10_000 {
            match balancer.balance(builder, members).unwrap() {
                Some(table) => last = table,
                None => return last,
            }
        }
        panic!("balancer did not converge within 10000 rounds");
    }

    #[test]
    fn balanced_three_way_placement() {
        let mut builder = SlotTableBuilder::new(16, 3);
        let balancer = DefaultSlotBalancer::new(Box::new(NaivePolicy::for_slot_num(16)));
        let members = members(&["A", "B", "C"]);

        let table = drive_to_convergence(&balancer, &mut builder, &members);

        for server in members.iter() {
            let node = builder.get_data_node_slot(server);
            assert!(node.leader_count() <= 6);
            assert!(node.leader_count() >= 5);
        }
        for slot in 0..16 {
            let assignment = table.assignment(slot).unwrap();
            assert!(assignment.leader().is_some());
            assert_eq!(assignment.follower_count(), 2);
        }
    }

    #[test]
    fn no_progress_returns_none_on_already_balanced_table() {
        let mut builder = SlotTableBuilder::new(16, 3);
        let balancer = DefaultSlotBalancer::new(Box::new(NaivePolicy::for_slot_num(16)));
        let members = members(&["A", "B", "C"]);

        drive_to_convergence(&balancer, &mut builder, &members);
        assert!(balancer.balance(&mut builder, &members).unwrap().is_none());
    }

    #[test]
    fn server_join_triggers_rebalance() {
        let mut builder = SlotTableBuilder::new(16, 3);
        let balancer = DefaultSlotBalancer::new(Box::new(NaivePolicy::for_slot_num(16)));
        let mut members = members(&["A", "B", "C"]);
        drive_to_convergence(&balancer, &mut builder, &members);

        members.insert(ServerId::new("D"));
        let table = drive_to_convergence(&balancer, &mut builder, &members);
        for server in members.iter() {
            let node = builder.get_data_node_slot(server);
            assert!(node.leader_count() <= 4);
        }
        for slot in 0..16 {
            assert!(table.assignment(slot).unwrap().leader().is_some());
        }
    }

    #[test]
    fn server_leave_reassigns_orphaned_slots() {
        let mut builder = SlotTableBuilder::new(16, 3);
        let balancer = DefaultSlotBalancer::new(Box::new(NaivePolicy::for_slot_num(16)));
        let mut members = members(&["A", "B", "C"]);
        drive_to_convergence(&balancer, &mut builder, &members);

        members.remove(&ServerId::new("C"));
        let table = drive_to_convergence(&balancer, &mut builder, &members);
        for slot in 0..16 {
            let assignment = table.assignment(slot).unwrap();
            assert!(members.contains(assignment.leader().unwrap()));
            for follower in assignment.followers() {
                assert!(members.contains(follower));
            }
        }
    }
}
