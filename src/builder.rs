use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::{
    error::{BalancerError, Result},
    ids::{ServerId, SlotId},
    node_slot::DataNodeSlot,
    slot_table::{SlotAssignment, SlotTable},
};

/// The mutable working copy of a slot-table.
///
/// A builder owns a full copy of the slot assignments plus per-server
/// leader/follower indices kept in lock-step with every mutation
/// (spec.md §4.3). It is constructed once per balancing round, mutated
/// exclusively by a [`crate::SlotBalancer`] implementation, and consumed by
/// [`SlotTableBuilder::build`], which snapshots it into an immutable
/// [`SlotTable`].
///
/// Not safe for concurrent mutation: callers must not share a builder
/// across threads without external synchronization (spec.md §5). Ordinary
/// `&mut` exclusive borrowing is sufficient; no marker type is needed to
/// express this.
#[derive(Debug, Clone)]
pub struct SlotTableBuilder {
    slot_num: u16,
    slot_replicas: usize,
    epoch: u64,
    assignments: Vec<SlotAssignment>,
    node_slots: BTreeMap<ServerId, DataNodeSlot>,
}

impl SlotTableBuilder {
    /// Builds an empty working copy for a cluster with `slot_num` slots and
    /// `slot_replicas` replicas per slot (including the leader).
    ///
    /// `slot_num` should be a power of two (spec.md §3); this is the
    /// caller's responsibility to uphold, not enforced here.
    pub fn new(slot_num: u16, slot_replicas: usize) -> Self {
        assert!(slot_replicas >= 1, "slot_replicas must be at least 1");
        Self {
            slot_num,
            slot_replicas,
            epoch: 0,
            assignments: vec![SlotAssignment::default(); slot_num as usize],
            node_slots: BTreeMap::new(),
        }
    }

    /// Seeds a working copy from a previous slot-table.
    pub fn from_table(table: &SlotTable) -> Self {
        let mut node_slots: BTreeMap<ServerId, DataNodeSlot> = BTreeMap::new();
        for (slot, assignment) in table.iter() {
            if let Some(leader) = assignment.leader() {
                node_slots.entry(leader.clone()).or_default().leaders.insert(slot);
            }
            for follower in assignment.followers() {
                node_slots
                    .entry(follower.clone())
                    .or_default()
                    .followers
                    .insert(slot);
            }
        }

        Self {
            slot_num: table.slot_num,
            slot_replicas: table.slot_replicas,
            epoch: table.epoch,
            assignments: table.assignments.clone(),
            node_slots,
        }
    }

    pub fn get_slot_nums(&self) -> u16 {
        self.slot_num
    }

    pub fn get_slot_replicas(&self) -> usize {
        self.slot_replicas
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn assignment(&self, slot: SlotId) -> &SlotAssignment {
        &self.assignments[slot as usize]
    }

    fn assignment_mut(&mut self, slot: SlotId) -> &mut SlotAssignment {
        &mut self.assignments[slot as usize]
    }

    /// Sets the leader of `slot` to `new_leader`, returning the prior
    /// leader (if any).
    ///
    /// If `new_leader` was already a follower of `slot`, it is removed from
    /// the follower set first (this is how a "swap", an existing follower
    /// being upgraded to leader, is expressed: callers additionally call
    /// [`SlotTableBuilder::add_follower`] to demote the prior leader, if
    /// that is what the algorithm calls for).
    pub fn replace_leader(&mut self, slot: SlotId, new_leader: ServerId) -> Result<Option<ServerId>> {
        if self.assignment(slot).followers.contains(&new_leader) {
            self.assignment_mut(slot).followers.remove(&new_leader);
            self.node_slots
                .entry(new_leader.clone())
                .or_default()
                .followers
                .remove(&slot);
        }

        if self.assignment(slot).followers.contains(&new_leader) {
            return Err(BalancerError::InvariantViolation(format!(
                "server {new_leader} remained a follower of slot {slot} after replaceLeader"
            )));
        }

        let old_leader = self.assignment_mut(slot).leader.replace(new_leader.clone());

        if let Some(old) = &old_leader {
            if let Some(node) = self.node_slots.get_mut(old) {
                node.leaders.remove(&slot);
            }
        }
        self.node_slots
            .entry(new_leader.clone())
            .or_default()
            .leaders
            .insert(slot);

        trace!(slot, leader = %new_leader, old_leader = ?old_leader.as_ref().map(ServerId::as_str), "replaceLeader");
        Ok(old_leader)
    }

    /// Adds `server` as a follower of `slot`.
    pub fn add_follower(&mut self, slot: SlotId, server: ServerId) -> Result<()> {
        let assignment = self.assignment(slot);
        if assignment.leader.as_ref() == Some(&server) || assignment.followers.contains(&server) {
            return Err(BalancerError::DuplicateReplica { slot, server });
        }
        if assignment.followers.len() + 1 > self.slot_replicas.saturating_sub(1) {
            return Err(BalancerError::Overflow { slot });
        }

        self.assignment_mut(slot).followers.insert(server.clone());
        self.node_slots.entry(server.clone()).or_default().followers.insert(slot);

        trace!(slot, follower = %server, "addFollower");
        Ok(())
    }

    /// Removes `server` from the follower set of `slot`.
    pub fn remove_follower(&mut self, slot: SlotId, server: &ServerId) -> Result<()> {
        if !self.assignment(slot).followers.contains(server) {
            return Err(BalancerError::NotFound {
                slot,
                server: server.clone(),
            });
        }
        self.assignment_mut(slot).followers.remove(server);
        if let Some(node) = self.node_slots.get_mut(server) {
            node.followers.remove(&slot);
        }

        trace!(slot, follower = %server, "removeFollower");
        Ok(())
    }

    /// Projection of the slots led/followed by `server`. Returns empty sets
    /// if `server` is not referenced anywhere in the working table.
    pub fn get_data_node_slot(&self, server: &ServerId) -> DataNodeSlot {
        self.node_slots.get(server).cloned().unwrap_or_default()
    }

    /// Followers of `slot`, ordered by lexicographic server id.
    pub fn get_data_servers_owns_follower(&self, slot: SlotId) -> Vec<ServerId> {
        self.assignment(slot).followers.iter().cloned().collect()
    }

    pub fn get_data_servers_owns_leader(&self, slot: SlotId) -> Option<ServerId> {
        self.assignment(slot).leader.clone()
    }

    fn leader_count(&self, server: &ServerId) -> usize {
        self.node_slots.get(server).map(|n| n.leaders.len()).unwrap_or(0)
    }

    fn follower_count(&self, server: &ServerId) -> usize {
        self.node_slots.get(server).map(|n| n.followers.len()).unwrap_or(0)
    }

    /// Servers (from `members`) whose leader count is strictly greater than
    /// `threshold`. Includes every member, even those leading zero slots.
    pub fn get_data_node_slots_leader_beyond(
        &self,
        members: &BTreeSet<ServerId>,
        threshold: usize,
    ) -> Vec<ServerId> {
        members
            .iter()
            .filter(|s| self.leader_count(s) > threshold)
            .cloned()
            .collect()
    }

    /// Servers whose leader count is strictly less than `threshold`.
    pub fn get_data_node_slots_leader_below(
        &self,
        members: &BTreeSet<ServerId>,
        threshold: usize,
    ) -> Vec<ServerId> {
        members
            .iter()
            .filter(|s| self.leader_count(s) < threshold)
            .cloned()
            .collect()
    }

    /// Servers whose follower count is strictly greater than `threshold`.
    pub fn get_data_node_slots_follower_beyond(
        &self,
        members: &BTreeSet<ServerId>,
        threshold: usize,
    ) -> Vec<ServerId> {
        members
            .iter()
            .filter(|s| self.follower_count(s) > threshold)
            .cloned()
            .collect()
    }

    /// Servers whose follower count is strictly less than `threshold`.
    pub fn get_data_node_slots_follower_below(
        &self,
        members: &BTreeSet<ServerId>,
        threshold: usize,
    ) -> Vec<ServerId> {
        members
            .iter()
            .filter(|s| self.follower_count(s) < threshold)
            .cloned()
            .collect()
    }

    pub fn incr_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Snapshots the current working copy into an immutable [`SlotTable`].
    /// The caller is expected to have called
    /// [`SlotTableBuilder::incr_epoch`] beforehand if this round changed
    /// anything.
    pub fn build(&self) -> SlotTable {
        SlotTable {
            slot_num: self.slot_num,
            slot_replicas: self.slot_replicas,
            epoch: self.epoch,
            assignments: self.assignments.clone(),
        }
    }

    /// Phase 0: repairs slots with no eligible leader or a short follower
    /// set under `members`, bounded by `cap` slots per call.
    ///
    /// For each slot, in order: strip any follower no longer in `members`;
    /// if the leader is missing (left the membership, or never assigned),
    /// promote a remaining follower with fewest current leaders
    /// (tie-break by id), falling back to the member with fewest current
    /// leaders if no follower is eligible, same tie-break as
    /// `LeaderOnlyBalancer`'s bootstrap step; then top up the follower set
    /// to `min(slotReplicas - 1, members.len() - 1)` by repeatedly adding
    /// the eligible member (not the leader, not already a follower) with
    /// fewest current followers, tie-break by id.
    ///
    /// A slot counts against `cap` once if anything on it changed,
    /// regardless of how many of the steps above fired, matching how
    /// movement is measured elsewhere (one count per slot whose
    /// `(leader, followers)` tuple changed, not per sub-operation). Stops
    /// as soon as `cap` slots have been touched. Returns `true` if
    /// anything changed.
    ///
    /// This is the explicit repair pass spec.md §9 leaves to the
    /// implementer's discretion; this crate takes option (b), extended to
    /// also fill followers so a cold start doesn't converge with leaders
    /// but zero replicas.
    pub fn repair_orphaned(&mut self, members: &BTreeSet<ServerId>, cap: usize) -> bool {
        let mut changed_slots = 0usize;
        let quota = (self.slot_replicas.saturating_sub(1)).min(members.len().saturating_sub(1));

        for slot in 0..self.slot_num {
            if changed_slots >= cap {
                break;
            }
            let mut slot_changed = false;

            let stale_followers: Vec<ServerId> = self
                .assignment(slot)
                .followers
                .iter()
                .filter(|s| !members.contains(*s))
                .cloned()
                .collect();
            for server in stale_followers {
                let _ = self.remove_follower(slot, &server);
                slot_changed = true;
            }

            let leader_missing = match self.assignment(slot).leader.as_ref() {
                Some(leader) => !members.contains(leader),
                None => true,
            };
            if leader_missing {
                let candidates = self.get_data_servers_owns_follower(slot);
                let promoted = candidates
                    .into_iter()
                    .filter(|c| members.contains(c))
                    .min_by_key(|c| (self.leader_count(c), c.clone()));

                // Promoting an existing follower is cheaper than assigning
                // a fresh one; fall back to the fewest-leaders member
                // otherwise.
                let new_leader = promoted.or_else(|| {
                    members
                        .iter()
                        .min_by_key(|c| (self.leader_count(c), (*c).clone()))
                        .cloned()
                });

                if let Some(new_leader) = new_leader {
                    if self.replace_leader(slot, new_leader.clone()).is_ok() {
                        slot_changed = true;
                        trace!(slot, leader = %new_leader, phase = "repair", "assigned leader for orphaned or unassigned slot");
                    }
                }
            }

            while self.assignment(slot).followers.len() < quota {
                let leader = self.assignment(slot).leader.clone();
                let candidate = members
                    .iter()
                    .filter(|m| Some(*m) != leader.as_ref() && !self.assignment(slot).followers.contains(*m))
                    .min_by_key(|m| (self.follower_count(m), (*m).clone()))
                    .cloned();
                match candidate {
                    Some(candidate) if self.add_follower(slot, candidate.clone()).is_ok() => {
                        slot_changed = true;
                        trace!(slot, follower = %candidate, phase = "repair", "filled short follower set");
                    }
                    _ => break,
                }
            }

            if slot_changed {
                changed_slots += 1;
            }
        }

        changed_slots > 0
    }
}
