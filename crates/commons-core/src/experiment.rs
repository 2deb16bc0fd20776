//! Round lifecycle controller for one experiment instance.
//!
//! An [`Experiment`] moves through
//! `Inactive -> Active -> RoundInProgress -> Active -> ... -> Completed`.
//! Starting a round forms groups when needed, materializes the round's data
//! and hands over to the family strategy; ending a round runs settlement.
//!
//! Every transition is atomic: state is checkpointed first and restored if
//! anything fails, and round events are only delivered to listeners once the
//! transition has committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use commons_types::{
    ExperimentFamily, ExperimentId, ExperimentStatus, Membership, Owner, ParameterRegistry,
    ParticipantId, RoundPointer, Value,
};

use crate::config::TreatmentConfig;
use crate::error::LifecycleError;
use crate::events::{RoundEvent, RoundEventKind, RoundEventListener};
use crate::observer::{RoundLifecycleObserver, observer_for};
use crate::registry::RoundRegistry;
use crate::state::{ExperimentSettings, ExperimentState};

/// One running experiment: state, family strategy and event listeners.
pub struct Experiment {
    pub(crate) state: ExperimentState,
    pub(crate) observer: Box<dyn RoundLifecycleObserver>,
    listeners: Vec<Box<dyn RoundEventListener>>,
    pending: Vec<RoundEvent>,
}

impl Experiment {
    /// Create an inactive experiment running `config` with its family's
    /// strategy.
    pub fn new(
        config: &TreatmentConfig,
        parameters: Arc<ParameterRegistry>,
    ) -> Result<Self, LifecycleError> {
        Self::with_observer(config, parameters, observer_for(config.family))
    }

    /// Create an inactive experiment with an explicit strategy.
    pub fn with_observer(
        config: &TreatmentConfig,
        parameters: Arc<ParameterRegistry>,
        observer: Box<dyn RoundLifecycleObserver>,
    ) -> Result<Self, LifecycleError> {
        let registry = RoundRegistry::new(config.rounds.clone())?;
        let state = ExperimentState::new(
            config.name.clone(),
            ExperimentSettings::from(config),
            registry,
            parameters,
        );
        info!(
            experiment = %state.id,
            name = %state.name,
            family = observer.family().namespace(),
            rounds = state.registry.len(),
            "experiment created"
        );
        Ok(Self {
            state,
            observer,
            listeners: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Subscribe to round events.
    pub fn add_listener(&mut self, listener: Box<dyn RoundEventListener>) {
        self.listeners.push(listener);
    }

    /// Read-only view of the experiment's state.
    pub const fn state(&self) -> &ExperimentState {
        &self.state
    }

    /// The family strategy in use.
    pub fn observer(&self) -> &dyn RoundLifecycleObserver {
        self.observer.as_ref()
    }

    /// Experiment identifier.
    pub const fn id(&self) -> ExperimentId {
        self.state.id
    }

    /// Lifecycle status.
    pub const fn status(&self) -> ExperimentStatus {
        self.state.status
    }

    /// Current position in the round sequence.
    pub const fn pointer(&self) -> RoundPointer {
        self.state.pointer
    }

    /// Experiment family.
    pub fn family(&self) -> ExperimentFamily {
        self.observer.family()
    }

    // -----------------------------------------------------------------------
    // Participants
    // -----------------------------------------------------------------------

    /// Register participants ahead of group formation. Returns how many were
    /// new.
    pub fn register_participants(
        &mut self,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> usize {
        let added = participants
            .into_iter()
            .filter(|p| self.state.topology.register(*p))
            .count();
        debug!(experiment = %self.state.id, added, "participants registered");
        added
    }

    /// Place a late joiner in the last open group of the current session.
    pub fn add_participant(
        &mut self,
        participant: ParticipantId,
    ) -> Result<Membership, LifecycleError> {
        let round = self.state.current_round()?.clone();
        let max = round.effective_max_group_size(self.state.settings.max_group_size);
        let membership = self
            .state
            .topology
            .add_participant(participant, max, &round.session_id);
        if self.state.settings.experimenter_driven {
            if let Ok(key) = self.state.current_key(
                Owner::Participant(membership.id),
                self.state.params().participant_ready,
            ) {
                self.state.store.get_or_create(key, Some(Value::Bool(false)))?;
            }
        }
        info!(
            experiment = %self.state.id,
            %participant,
            group = %membership.group_id,
            "participant added"
        );
        Ok(membership)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Activate and start the first round.
    ///
    /// A no-op for an experiment that is already active or archived.
    pub fn activate(&mut self) -> Result<(), LifecycleError> {
        match self.state.status {
            ExperimentStatus::Completed => {
                warn!(experiment = %self.state.id, "experiment is archived, not activating");
                Ok(())
            }
            ExperimentStatus::Active | ExperimentStatus::RoundInProgress => {
                debug!(experiment = %self.state.id, "experiment already active");
                Ok(())
            }
            ExperimentStatus::Inactive => self.transition("activate", |exp| {
                exp.state.status = ExperimentStatus::Active;
                info!(experiment = %exp.state.id, "experiment activated");
                exp.begin_round()
            }),
        }
    }

    /// Start the current round.
    ///
    /// Starting a round that is already in progress is a no-op. An inactive
    /// or completed experiment rejects the call with
    /// [`LifecycleError::InvalidTransition`] instead of ignoring it.
    pub fn start_round(&mut self) -> Result<(), LifecycleError> {
        match self.state.status {
            ExperimentStatus::RoundInProgress => {
                warn!(
                    experiment = %self.state.id,
                    round = %self.state.pointer,
                    "round already in progress"
                );
                Ok(())
            }
            ExperimentStatus::Active => self.transition("start_round", Self::begin_round),
            status => Err(LifecycleError::InvalidTransition {
                action: "start round",
                status,
            }),
        }
    }

    /// End the round in progress and run settlement.
    ///
    /// Ending when no round is in progress is a no-op.
    pub fn end_round(&mut self) -> Result<(), LifecycleError> {
        if self.state.status != ExperimentStatus::RoundInProgress {
            warn!(experiment = %self.state.id, status = ?self.state.status, "no round in progress to end");
            return Ok(());
        }
        self.transition("end_round", Self::finish_round)
    }

    /// End the current round if needed and start the next repetition or
    /// configuration.
    ///
    /// At the last round this only ends the round in progress. An inactive
    /// or completed experiment rejects the call with
    /// [`LifecycleError::InvalidTransition`].
    pub fn advance_to_next_round(&mut self) -> Result<(), LifecycleError> {
        self.require_active("advance to next round")?;
        self.transition("advance_to_next_round", |exp| {
            if exp.state.status == ExperimentStatus::RoundInProgress {
                exp.finish_round()?;
            }
            match exp.state.registry.successor(exp.state.pointer) {
                Some(next) => {
                    exp.state.pointer = next;
                    exp.begin_round()
                }
                None => {
                    warn!(
                        experiment = %exp.state.id,
                        round = %exp.state.pointer,
                        "already at the last round"
                    );
                    Ok(())
                }
            }
        })
    }

    /// End the current round if needed and start it again.
    pub fn restart_round(&mut self) -> Result<(), LifecycleError> {
        self.require_active("restart round")?;
        self.transition("restart_round", |exp| {
            if exp.state.status == ExperimentStatus::RoundInProgress {
                exp.finish_round()?;
            }
            exp.begin_round()
        })
    }

    /// End the current round if needed and archive the experiment.
    pub fn complete(&mut self) -> Result<(), LifecycleError> {
        if self.state.status == ExperimentStatus::Completed {
            debug!(experiment = %self.state.id, "experiment already completed");
            return Ok(());
        }
        self.transition("complete", |exp| {
            if exp.state.status == ExperimentStatus::RoundInProgress {
                exp.finish_round()?;
            }
            exp.state.status = ExperimentStatus::Completed;
            info!(experiment = %exp.state.id, round = %exp.state.pointer, "experiment completed");
            Ok(())
        })
    }

    /// Delete groups, round data and values and rewind to round 1.
    pub fn reset(&mut self) {
        self.state.clear();
        self.pending.clear();
        info!(experiment = %self.state.id, "experiment reset");
    }

    /// Reset, then activate from round 1.
    pub fn restart(&mut self) -> Result<(), LifecycleError> {
        self.reset();
        self.activate()
    }

    /// End the current round if needed and rewind one configuration without
    /// starting it.
    pub fn move_to_previous_round(&mut self) -> Result<(), LifecycleError> {
        self.require_active("move to previous round")?;
        self.transition("move_to_previous_round", |exp| {
            if exp.state.status == ExperimentStatus::RoundInProgress {
                exp.finish_round()?;
            }
            exp.state.pointer = exp.state.registry.predecessor(exp.state.pointer);
            exp.state.round_started_at = None;
            info!(experiment = %exp.state.id, round = %exp.state.pointer, "moved to previous round");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// End a timed round whose time is up. Returns whether it ended.
    pub fn check_elapsed_time(&mut self, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        if !self.is_time_expired(now) {
            return Ok(false);
        }
        info!(experiment = %self.state.id, round = %self.state.pointer, "round time expired");
        self.end_round()?;
        Ok(true)
    }

    /// Whether a timed round in progress has run out of time.
    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_time_expired(now)
    }

    /// Seconds left in a timed round in progress.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.state.time_remaining(now)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_active(&self, action: &'static str) -> Result<(), LifecycleError> {
        if self.state.status.is_active() {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                action,
                status: self.state.status,
            })
        }
    }

    /// Run `step` atomically, restoring the checkpoint on failure.
    fn transition<F>(&mut self, action: &'static str, step: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut Self) -> Result<(), LifecycleError>,
    {
        let checkpoint = self.state.checkpoint();
        self.pending.clear();
        match step(self) {
            Ok(()) => {
                self.dispatch();
                Ok(())
            }
            Err(error) => {
                error!(
                    experiment = %self.state.id,
                    action,
                    %error,
                    "transition failed, state rolled back"
                );
                self.state.restore(checkpoint);
                self.pending.clear();
                Err(error)
            }
        }
    }

    fn dispatch(&mut self) {
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            for listener in &mut self.listeners {
                listener.on_round_event(event, &self.state);
            }
        }
    }

    /// Form groups if needed, create round data and run the start strategy.
    fn begin_round(&mut self) -> Result<(), LifecycleError> {
        let round = self.state.current_round()?.clone();
        let repetition = self.state.pointer.repetition;

        let has_groups = self
            .state
            .topology
            .groups_in_session(&round.session_id)
            .next()
            .is_some();
        let randomize = round.should_randomize(repetition);
        let mut allocated = false;
        if !has_groups || randomize {
            let shuffle = randomize || self.state.settings.shuffle_participants;
            match self.state.allocate_groups(&round, shuffle) {
                Ok(_) => allocated = true,
                Err(error) => warn!(
                    experiment = %self.state.id,
                    round = %self.state.pointer,
                    %error,
                    "group allocation aborted"
                ),
            }
        }

        let has_clusters = self
            .state
            .topology
            .clusters_in_session(&round.session_id)
            .next()
            .is_some();
        if round.flags.create_group_clusters && (allocated || !has_clusters) {
            if let Err(error) = self.state.create_clusters(&round) {
                warn!(
                    experiment = %self.state.id,
                    round = %self.state.pointer,
                    %error,
                    "cluster creation aborted"
                );
            }
        }

        self.state.ensure_round_data(self.state.pointer)?;
        self.state.seed_readiness()?;
        self.state.status = ExperimentStatus::RoundInProgress;
        self.state.round_started_at = Some(Utc::now());
        self.observer.round_started(&mut self.state)?;

        info!(
            experiment = %self.state.id,
            round = %self.state.pointer,
            kind = round.kind.description(),
            "round started"
        );
        self.pending.push(RoundEvent {
            experiment_id: self.state.id,
            pointer: self.state.pointer,
            round_kind: round.kind,
            kind: RoundEventKind::Started,
        });
        Ok(())
    }

    /// Run the end strategy and return to `Active`.
    fn finish_round(&mut self) -> Result<(), LifecycleError> {
        let kind = self.state.current_round()?.kind;
        self.state.status = ExperimentStatus::Active;
        let report = self.observer.round_ended(&mut self.state)?;
        self.state.round_started_at = None;

        info!(
            experiment = %self.state.id,
            round = %self.state.pointer,
            pools = report.groups.len().saturating_add(report.clusters.len()),
            repaired = report.repaired_decisions,
            "round ended"
        );
        self.pending.push(RoundEvent {
            experiment_id: self.state.id,
            pointer: self.state.pointer,
            round_kind: kind,
            kind: RoundEventKind::Ended(report),
        });
        Ok(())
    }
}
