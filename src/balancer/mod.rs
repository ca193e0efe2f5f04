mod default_balancer;
mod leader_only;

use std::collections::BTreeSet;

pub use default_balancer::DefaultSlotBalancer;
pub use leader_only::LeaderOnlyBalancer;

use crate::{builder::SlotTableBuilder, error::Result, ids::ServerId, slot_table::SlotTable, BalancePolicy};

/// Recomputes slot-table role assignments against a working builder.
///
/// Two implementations share this single-operation contract (spec.md §9):
/// [`DefaultSlotBalancer`] for `slot_replicas >= 2`, [`LeaderOnlyBalancer`]
/// for `slot_replicas < 2`. [`for_replicas`] picks the right one.
pub trait SlotBalancer {
    /// Runs at most one balancing phase against `builder`.
    ///
    /// Returns `Ok(Some(table))` with a strictly greater epoch if any phase
    /// changed state, `Ok(None)` if nothing needed to change (the common
    /// steady-state outcome), or `Err` if `members` is empty or a
    /// postcondition failed.
    fn balance(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
    ) -> Result<Option<SlotTable>>;
}

/// Picks [`LeaderOnlyBalancer`] when `slot_replicas < 2`, otherwise
/// [`DefaultSlotBalancer`] (spec.md §4.4).
pub fn for_replicas(slot_replicas: usize, policy: Box<dyn BalancePolicy>) -> Box<dyn SlotBalancer> {
    if slot_replicas < 2 {
        Box::new(LeaderOnlyBalancer::new(policy))
    } else {
        Box::new(DefaultSlotBalancer::new(policy))
    }
}
