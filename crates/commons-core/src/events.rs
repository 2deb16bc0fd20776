//! Round notifications for presentation-layer subscribers.
//!
//! Listeners are called after the family strategy has run and the
//! transition has committed, so they always observe settled state.

use commons_types::{ExperimentId, RoundKind, RoundPointer};
use commons_world::{ClusterSettlement, GroupSettlement, ParticipantSettlement};

use crate::state::ExperimentState;

/// Settlement results produced at the end of a round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// One entry per settled group pool.
    pub groups: Vec<GroupSettlement>,
    /// One entry per settled shared pool.
    pub clusters: Vec<ClusterSettlement>,
    /// Participant storage settlement, for families that track it.
    pub participants: Option<ParticipantSettlement>,
    /// Harvest decisions that had to be filled in or de-duplicated.
    pub repaired_decisions: usize,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEventKind {
    /// A round started.
    Started,
    /// A round ended, with its settlement report.
    Ended(RoundReport),
}

/// A round boundary notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEvent {
    /// Experiment the round belongs to.
    pub experiment_id: ExperimentId,
    /// Round position.
    pub pointer: RoundPointer,
    /// Round kind.
    pub round_kind: RoundKind,
    /// Start or end.
    pub kind: RoundEventKind,
}

/// Subscriber to round boundary notifications.
pub trait RoundEventListener: Send {
    /// Called once per committed round start or end.
    fn on_round_event(&mut self, event: &RoundEvent, state: &ExperimentState);
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl RoundEventListener for NoOpListener {
    fn on_round_event(&mut self, _event: &RoundEvent, _state: &ExperimentState) {}
}
