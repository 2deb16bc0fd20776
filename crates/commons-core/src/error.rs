//! Error types for the `commons-core` crate.

use rust_decimal::Decimal;

use commons_store::StoreError;
use commons_types::{ExperimentStatus, MembershipId};
use commons_world::{DynamicsError, TopologyError, WorldError};

use crate::registry::RegistryError;

/// Errors raised by lifecycle transitions and family strategies.
///
/// A transition that returns one of these has been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The transition is not allowed from the current status.
    #[error("cannot {action} while experiment is {status:?}")]
    InvalidTransition {
        /// What was attempted.
        action: &'static str,
        /// Status at the time.
        status: ExperimentStatus,
    },

    /// No round data exists for the current pointer.
    #[error("no round data for the current round")]
    NoRoundData,

    /// Round sequence lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Settlement failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// Data store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TopologyError> for LifecycleError {
    fn from(error: TopologyError) -> Self {
        Self::World(WorldError::Topology(error))
    }
}

impl From<DynamicsError> for LifecycleError {
    fn from(error: DynamicsError) -> Self {
        Self::World(WorldError::Dynamics(error))
    }
}

/// Reasons a participant action is rejected at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// Decisions are only accepted while a round is in progress.
    #[error("no round in progress")]
    RoundNotInProgress,

    /// The current round does not collect harvest decisions.
    #[error("the current round does not accept harvest decisions")]
    NotPlayable,

    /// The membership is not in a group of the current round's session.
    #[error("unknown participant: {0}")]
    UnknownParticipant(MembershipId),

    /// Dead participants cannot harvest.
    #[error("participant {0} is no longer alive")]
    ParticipantDead(MembershipId),

    /// Amount outside `0..=max`.
    #[error("harvest decision {amount} must be between 0 and {max}")]
    OutOfRange {
        /// Requested amount.
        amount: Decimal,
        /// Current allowed maximum.
        max: Decimal,
    },

    /// Underlying lifecycle or store failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl From<StoreError> for SubmissionError {
    fn from(error: StoreError) -> Self {
        Self::Lifecycle(LifecycleError::Store(error))
    }
}
