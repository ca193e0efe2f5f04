use std::collections::BTreeSet;

use crate::ids::{ServerId, SlotId};

/// The leader and followers assigned to a single slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAssignment {
    pub(crate) leader: Option<ServerId>,
    pub(crate) followers: BTreeSet<ServerId>,
}

impl SlotAssignment {
    pub fn leader(&self) -> Option<&ServerId> {
        self.leader.as_ref()
    }

    /// Followers ordered by lexicographic server id.
    pub fn followers(&self) -> impl Iterator<Item = &ServerId> {
        self.followers.iter()
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }
}

/// An immutable snapshot of slot-role assignments across the cluster.
///
/// A `SlotTable` is produced only by [`crate::SlotTableBuilder::build`]. Its
/// invariants (spec.md §3) are upheld by construction: every mutation that
/// could violate them is rejected by the builder before a table is ever
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    pub(crate) slot_num: u16,
    pub(crate) slot_replicas: usize,
    pub(crate) epoch: u64,
    pub(crate) assignments: Vec<SlotAssignment>,
}

impl SlotTable {
    /// Monotonically increasing version. A freshly balanced table always has
    /// a strictly greater epoch than the table it replaced.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn slot_num(&self) -> u16 {
        self.slot_num
    }

    pub fn slot_replicas(&self) -> usize {
        self.slot_replicas
    }

    /// Returns the assignment for `slot`, or `None` if `slot` is out of
    /// range.
    pub fn assignment(&self, slot: SlotId) -> Option<&SlotAssignment> {
        self.assignments.get(slot as usize)
    }

    pub fn leader(&self, slot: SlotId) -> Option<&ServerId> {
        self.assignment(slot).and_then(SlotAssignment::leader)
    }

    pub fn followers(&self, slot: SlotId) -> impl Iterator<Item = &ServerId> {
        self.assignment(slot)
            .into_iter()
            .flat_map(SlotAssignment::followers)
    }

    /// Iterates over every slot id and its assignment, in slot-id order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &SlotAssignment)> {
        self.assignments
            .iter()
            .enumerate()
            .map(|(slot, assignment)| (slot as SlotId, assignment))
    }
}
