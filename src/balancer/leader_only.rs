use std::collections::BTreeSet;

use tracing::{debug, info};

use super::SlotBalancer;
use crate::{
    builder::SlotTableBuilder,
    comparators,
    error::{BalancerError, Result},
    ids::ServerId,
    policy::BalancePolicy,
    slot_table::SlotTable,
};

/// The degenerate balancer used when `slot_replicas < 2` (spec.md §4.4):
/// leaders only, no followers to juggle.
pub struct LeaderOnlyBalancer {
    policy: Box<dyn BalancePolicy>,
}

impl LeaderOnlyBalancer {
    pub fn new(policy: Box<dyn BalancePolicy>) -> Self {
        Self { policy }
    }
}

impl SlotBalancer for LeaderOnlyBalancer {
    fn balance(
        &self,
        builder: &mut SlotTableBuilder,
        members: &BTreeSet<ServerId>,
    ) -> Result<Option<SlotTable>> {
        if members.is_empty() {
            return Err(BalancerError::NoDataServers);
        }

        let cap = self.policy.max_move_leader_slots();

        if builder.repair_orphaned(members, cap) {
            builder.incr_epoch();
            info!(phase = "repair", "repaired orphaned leaders");
            return Ok(Some(builder.build()));
        }

        let mut moved = 0usize;

        // Steps 1+2: assign a leader to every slot that has none under the
        // current membership. repair_orphaned already folded "leader left
        // membership" into "no leader", so a single pass covers both.
        for slot in 0..builder.get_slot_nums() {
            if moved >= cap {
                break;
            }
            if builder.get_data_servers_owns_leader(slot).is_some() {
                continue;
            }
            let mut candidates: Vec<ServerId> = members.iter().cloned().collect();
            comparators::sort_least_leaders_first(builder, &mut candidates);
            if let Some(chosen) = candidates.into_iter().next() {
                builder.replace_leader(slot, chosen.clone())?;
                debug!(slot, leader = %chosen, phase = "leader_only_assign", "assigned leader");
                moved += 1;
            }
        }

        if moved > 0 {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }

        // Step 3: greedy rebalance while any server exceeds ceil(slot_num / N).
        let n = members.len();
        let slot_num = builder.get_slot_nums() as usize;
        let ceil = slot_num / n + usize::from(slot_num % n != 0);

        loop {
            if moved >= cap {
                break;
            }
            let mut hot: Vec<ServerId> = members.iter().cloned().collect();
            comparators::sort_most_leaders_first(builder, &mut hot);
            let Some(hottest) = hot
                .into_iter()
                .find(|s| builder.get_data_node_slot(s).leader_count() > ceil)
            else {
                break;
            };

            let mut cold: Vec<ServerId> = members.iter().cloned().collect();
            comparators::sort_least_leaders_first(builder, &mut cold);
            let Some(coldest) = cold.into_iter().find(|s| s != &hottest) else {
                break;
            };

            let slot = builder
                .get_data_node_slot(&hottest)
                .leaders()
                .min()
                .expect("hottest server has a positive leader count");

            builder.replace_leader(slot, coldest.clone())?;
            debug!(slot, from = %hottest, to = %coldest, phase = "leader_only_rebalance", "moved leader");
            moved += 1;
        }

        if moved > 0 {
            builder.incr_epoch();
            return Ok(Some(builder.build()));
        }

        Ok(None)
    }
}
