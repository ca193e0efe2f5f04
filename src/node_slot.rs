use std::collections::BTreeSet;

use crate::ids::SlotId;

/// A per-server projection of a slot-table: the slots a server leads and the
/// slots it follows.
///
/// A server never appears as both leader and follower of the same slot
/// (spec.md §3); [`SlotTableBuilder`](crate::SlotTableBuilder) enforces this
/// at every mutation, so a `DataNodeSlot` derived from a builder or table is
/// always consistent with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataNodeSlot {
    pub(crate) leaders: BTreeSet<SlotId>,
    pub(crate) followers: BTreeSet<SlotId>,
}

impl DataNodeSlot {
    pub fn leaders(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.leaders.iter().copied()
    }

    pub fn followers(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.followers.iter().copied()
    }

    pub fn leader_count(&self) -> usize {
        self.leaders.len()
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    pub fn is_leader_of(&self, slot: SlotId) -> bool {
        self.leaders.contains(&slot)
    }

    pub fn is_follower_of(&self, slot: SlotId) -> bool {
        self.followers.contains(&slot)
    }
}
