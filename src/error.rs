use thiserror::Error;

use crate::ids::{ServerId, SlotId};

/// Errors raised by the slot-table builder and the balancer.
///
/// `NoDataServers`, `DuplicateReplica`, `Overflow` and `NotFound` are
/// ordinary, expected `Result` returns: they indicate caller misuse of the
/// mutation API or an empty membership set, not a bug in the balancer
/// itself. `InvariantViolation` is different: it means a balancer
/// postcondition failed (see spec.md §7), and callers must treat it as
/// fatal to the round, logging loudly and retaining the prior slot-table
/// rather than retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalancerError {
    /// `balance()` was invoked with an empty data-server membership set.
    #[error("no data servers in membership")]
    NoDataServers,

    /// `addFollower` was called for a server that is already leader or
    /// follower of the slot.
    #[error("server {server} is already a replica of slot {slot}")]
    DuplicateReplica { slot: SlotId, server: ServerId },

    /// `addFollower` would push the follower count past `slotReplicas - 1`.
    #[error("slot {slot} already has the maximum number of followers")]
    Overflow { slot: SlotId },

    /// `removeFollower` was called for a server that is not a follower of
    /// the slot.
    #[error("server {server} is not a follower of slot {slot}")]
    NotFound { slot: SlotId, server: ServerId },

    /// A balancer postcondition failed. This is a bug, not a recoverable
    /// condition: the caller should log this loudly and abandon the round,
    /// keeping the previous slot-table in place.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience alias for the balancer's result type.
pub type Result<T> = std::result::Result<T, BalancerError>;
