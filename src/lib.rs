//! Deterministic slot-table balancing for a sharded service-registry
//! cluster.
//!
//! A [`SlotTable`] maps each of a fixed number of slots to a leader and an
//! ordered set of followers. Given a membership of data-servers and a
//! prior table, a [`SlotBalancer`] recomputes role assignments one phase
//! at a time: callers build a [`SlotTableBuilder`] from the prior table,
//! call [`SlotBalancer::balance`] repeatedly until it returns `Ok(None)`,
//! and persist whichever `SlotTable` the last non-`None` call returned.
//!
//! The crate is pure and single-threaded: no I/O, no wire format, no
//! background tasks. Picking the right balancer for a cluster's replica
//! count is [`for_replicas`]'s job.

mod balancer;
mod builder;
mod comparators;
mod error;
mod ids;
mod node_slot;
mod policy;
mod slot_table;

pub use balancer::{for_replicas, DefaultSlotBalancer, LeaderOnlyBalancer, SlotBalancer};
pub use builder::SlotTableBuilder;
pub use error::{BalancerError, Result};
pub use ids::{ServerId, SlotId};
pub use node_slot::DataNodeSlot;
pub use policy::{BalancePolicy, NaivePolicy};
pub use slot_table::{SlotAssignment, SlotTable};
