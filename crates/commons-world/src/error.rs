//! Error types for the `commons-world` crate.
//!
//! Topology and dynamics each have their own error enum; settlement, which
//! touches both plus the data store, returns [`WorldError`].

use rust_decimal::Decimal;

use commons_store::StoreError;
use commons_types::{GroupId, MembershipId};

/// Errors raised while forming groups and clusters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Existing groups must be preserved but the round has no session id.
    #[error("cannot preserve existing groups without a session id")]
    MissingSessionId,

    /// The session's group count is not a multiple of the cluster size.
    #[error("{groups} groups in session {session_id:?} cannot form clusters of {cluster_size}")]
    NotDivisible {
        /// Session whose groups were being clustered.
        session_id: String,
        /// Number of groups in the session.
        groups: usize,
        /// Requested groups per cluster.
        cluster_size: u32,
    },

    /// Cluster size of zero.
    #[error("cluster size must be at least 1")]
    InvalidClusterSize,

    /// No group with this id.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// No membership with this id.
    #[error("membership not found: {0}")]
    MembershipNotFound(MembershipId),
}

/// Errors raised by pure resource arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DynamicsError {
    /// Arithmetic overflow during a checked operation.
    #[error("arithmetic overflow in resource calculation")]
    ArithmeticOverflow,

    /// Regrowth rate outside `[0, 1]`.
    #[error("regrowth rate {0} outside [0, 1]")]
    InvalidRegrowthRate(Decimal),

    /// A pool with no members cannot be rationed.
    #[error("cannot ration a pool with no members")]
    EmptyPool,
}

/// Errors raised during settlement.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// Topology lookup or construction failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Resource arithmetic failed.
    #[error(transparent)]
    Dynamics(#[from] DynamicsError),

    /// Data store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value did not have the expected type.
    #[error("value for {what} is not {expected}")]
    UnexpectedValue {
        /// What was being read.
        what: &'static str,
        /// The expected type.
        expected: &'static str,
    },
}
