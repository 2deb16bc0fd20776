//! Mutable state of one experiment instance.
//!
//! [`ExperimentState`] is what lifecycle strategies read and write: the data
//! store, group topology, round pointer and materialized rounds. The
//! lifecycle controller owns it and snapshots it into a [`Checkpoint`] before
//! every transition so a failed transition leaves nothing half-applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use tracing::debug;

use commons_store::{DataStore, ValueKey};
use commons_types::{
    ExperimentFamily, ExperimentId, ExperimentStatus, GroupId, Membership, MembershipId, Owner,
    ParameterId, ParameterRegistry, RoundConfiguration, RoundData, RoundDataId, RoundPointer,
    SimulationParameters, Value,
};
use commons_world::{AllocationRequest, Topology, TopologyError, decimal_or_zero};

use crate::config::TreatmentConfig;
use crate::error::LifecycleError;
use crate::registry::RoundRegistry;

/// Treatment-level settings an experiment runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSettings {
    /// Settlement strategy family.
    pub family: ExperimentFamily,
    /// Group size limit; `None` is unbounded.
    pub max_group_size: Option<u32>,
    /// Shuffle participants when groups are first formed.
    pub shuffle_participants: bool,
    /// Readiness values are tracked for every participant.
    pub experimenter_driven: bool,
    /// Largest harvest a participant may request.
    pub max_harvest_decision: Decimal,
    /// Resource units budgeted per participant per round.
    pub initial_resources_per_participant_per_round: Decimal,
    /// Rounds used by the capacity formula.
    pub rounds_in_treatment: Option<u32>,
    /// Treatment-wide regrowth rate.
    pub regrowth_rate: Option<Decimal>,
    /// Treatment-wide cost of living.
    pub cost_of_living: Option<Decimal>,
    /// RNG seed.
    pub seed: u64,
}

impl From<&TreatmentConfig> for ExperimentSettings {
    fn from(config: &TreatmentConfig) -> Self {
        Self {
            family: config.family,
            max_group_size: config.group_size_limit(),
            shuffle_participants: config.shuffle_participants,
            experimenter_driven: config.experimenter_driven,
            max_harvest_decision: config.max_harvest_decision,
            initial_resources_per_participant_per_round: config
                .initial_resources_per_participant_per_round,
            rounds_in_treatment: config.rounds_in_treatment,
            regrowth_rate: config.regrowth_rate,
            cost_of_living: config.cost_of_living,
            seed: config.seed,
        }
    }
}

/// Snapshot of everything a transition may change.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    status: ExperimentStatus,
    pointer: RoundPointer,
    store: DataStore,
    topology: Topology,
    rounds: BTreeMap<RoundPointer, RoundData>,
    round_started_at: Option<DateTime<Utc>>,
    rng: StdRng,
}

/// All mutable state of one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentState {
    /// Experiment identifier.
    pub id: ExperimentId,
    /// Treatment name.
    pub name: String,
    /// Treatment-level settings.
    pub settings: ExperimentSettings,
    /// Round sequence.
    pub registry: RoundRegistry,
    /// Shared parameter registry.
    pub parameters: Arc<ParameterRegistry>,
    /// Lifecycle status.
    pub status: ExperimentStatus,
    /// Current position in the round sequence.
    pub pointer: RoundPointer,
    /// Versioned data values.
    pub store: DataStore,
    /// Groups and clusters.
    pub topology: Topology,
    /// When the current round started.
    pub round_started_at: Option<DateTime<Utc>>,
    rounds: BTreeMap<RoundPointer, RoundData>,
    rng: StdRng,
}

impl ExperimentState {
    /// Fresh, inactive state at the first round.
    pub fn new(
        name: impl Into<String>,
        settings: ExperimentSettings,
        registry: RoundRegistry,
        parameters: Arc<ParameterRegistry>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            id: ExperimentId::new(),
            name: name.into(),
            settings,
            registry,
            parameters,
            status: ExperimentStatus::Inactive,
            pointer: RoundPointer::first(),
            store: DataStore::new(),
            topology: Topology::new(),
            round_started_at: None,
            rounds: BTreeMap::new(),
            rng,
        }
    }

    /// Copy of the simulation parameter handles.
    pub fn params(&self) -> SimulationParameters {
        *self.parameters.simulation()
    }

    // -----------------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------------

    /// Configuration of the current round.
    pub fn current_round(&self) -> Result<&RoundConfiguration, LifecycleError> {
        Ok(self.registry.get(self.pointer.sequence_number)?)
    }

    /// Materialized round at `pointer`, if it has been created.
    pub fn round_data(&self, pointer: RoundPointer) -> Option<&RoundData> {
        self.rounds.get(&pointer)
    }

    /// Every materialized round in pointer order.
    pub fn rounds(&self) -> impl DoubleEndedIterator<Item = &RoundData> {
        self.rounds.values()
    }

    /// Identifier of the current round's data.
    pub fn current_round_id(&self) -> Result<RoundDataId, LifecycleError> {
        self.rounds
            .get(&self.pointer)
            .map(|r| r.id)
            .ok_or(LifecycleError::NoRoundData)
    }

    /// Round data for `pointer`, created on first access.
    pub fn ensure_round_data(&mut self, pointer: RoundPointer) -> Result<RoundDataId, LifecycleError> {
        if let Some(existing) = self.rounds.get(&pointer) {
            return Ok(existing.id);
        }
        let round = RoundData::new(self.id, pointer);
        let id = round.id;
        self.rounds.insert(pointer, round);
        debug!(experiment = %self.id, round = %pointer, "round data created");
        Ok(id)
    }

    /// Give every membership of the current round's session a
    /// `participant_ready = false` value, keeping any that already exist.
    ///
    /// Only experimenter-driven experiments track readiness. Groups must be
    /// formed first.
    pub fn seed_readiness(&mut self) -> Result<(), LifecycleError> {
        if !self.settings.experimenter_driven {
            return Ok(());
        }
        let id = self.ensure_round_data(self.pointer)?;
        let ready = self.params().participant_ready;
        let session = self.current_round()?.session_id.clone();
        for membership in self.session_memberships(&session) {
            let key = ValueKey::new(Owner::Participant(membership.id), id, ready);
            self.store.get_or_create(key, Some(Value::Bool(false)))?;
        }
        Ok(())
    }

    /// Round data for the round after the current one, if there is one.
    pub fn next_round_id(&mut self) -> Result<Option<RoundDataId>, LifecycleError> {
        match self.registry.successor(self.pointer) {
            Some(next) => self.ensure_round_data(next).map(Some),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Memberships of every group in `session_id`.
    pub fn session_memberships(&self, session_id: &str) -> Vec<Membership> {
        self.topology
            .groups_in_session(session_id)
            .flat_map(|g| g.members.iter().copied())
            .collect()
    }

    /// Identifiers of every group in `session_id`.
    pub fn session_groups(&self, session_id: &str) -> Vec<GroupId> {
        self.topology
            .groups_in_session(session_id)
            .map(|g| g.id)
            .collect()
    }

    /// Form groups for `round`.
    pub fn allocate_groups(
        &mut self,
        round: &RoundConfiguration,
        randomize: bool,
    ) -> Result<Vec<GroupId>, TopologyError> {
        let request = AllocationRequest {
            max_group_size: round.effective_max_group_size(self.settings.max_group_size),
            session_id: round.session_id.clone(),
            randomize,
            preserve_existing_groups: round.flags.preserve_existing_groups,
        };
        self.topology.allocate_groups(&request, &mut self.rng)
    }

    /// Partition the groups of `round`'s session into clusters.
    pub fn create_clusters(&mut self, round: &RoundConfiguration) -> Result<usize, TopologyError> {
        self.topology
            .create_clusters(&round.session_id, round.group_cluster_size, &mut self.rng)
    }

    /// Largest group size in `session_id`.
    pub fn largest_group(&self, session_id: &str) -> u32 {
        self.topology
            .groups_in_session(session_id)
            .map(|g| u32::try_from(g.size()).unwrap_or(u32::MAX))
            .max()
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Key for `owner`'s `parameter` in the current round.
    pub fn current_key(
        &self,
        owner: Owner,
        parameter: ParameterId,
    ) -> Result<ValueKey, LifecycleError> {
        Ok(ValueKey::new(owner, self.current_round_id()?, parameter))
    }

    /// Active decimal in the current round, or zero.
    pub fn decimal(&self, owner: Owner, parameter: ParameterId) -> Decimal {
        self.current_key(owner, parameter)
            .map_or(Decimal::ZERO, |key| decimal_or_zero(&self.store, &key))
    }

    /// Active boolean in the current round, or `default`.
    pub fn flag(&self, owner: Owner, parameter: ParameterId, default: bool) -> bool {
        self.current_key(owner, parameter)
            .ok()
            .and_then(|key| self.store.get(&key))
            .and_then(|row| row.value.as_bool())
            .unwrap_or(default)
    }

    /// Whether `membership` is alive in the current round.
    pub fn is_alive(&self, membership: MembershipId) -> bool {
        self.flag(Owner::Participant(membership), self.params().player_status, true)
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Seconds since the current round started.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let started = self.round_started_at?;
        u64::try_from(now.signed_duration_since(started).num_seconds()).ok()
    }

    /// Seconds left in a timed round that is in progress.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.status != ExperimentStatus::RoundInProgress {
            return None;
        }
        let round = self.current_round().ok()?;
        if !round.is_timed() {
            return None;
        }
        let elapsed = self.elapsed_secs(now).unwrap_or(0);
        Some(round.duration_secs.saturating_sub(elapsed))
    }

    /// Whether a timed round in progress has run out of time.
    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_remaining(now) == Some(0)
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Snapshot everything a transition may change.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            status: self.status,
            pointer: self.pointer,
            store: self.store.clone(),
            topology: self.topology.clone(),
            rounds: self.rounds.clone(),
            round_started_at: self.round_started_at,
            rng: self.rng.clone(),
        }
    }

    /// Restore a snapshot taken by [`Self::checkpoint`].
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.status = checkpoint.status;
        self.pointer = checkpoint.pointer;
        self.store = checkpoint.store;
        self.topology = checkpoint.topology;
        self.rounds = checkpoint.rounds;
        self.round_started_at = checkpoint.round_started_at;
        self.rng = checkpoint.rng;
    }

    /// Delete groups, clusters, round data and values; rewind to round 1.
    pub fn clear(&mut self) {
        self.store.clear();
        self.topology.clear();
        self.rounds.clear();
        self.pointer = RoundPointer::first();
        self.round_started_at = None;
        self.status = ExperimentStatus::Inactive;
        self.rng = StdRng::seed_from_u64(self.settings.seed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use commons_types::{ParticipantId, RoundKind};

    use super::*;

    fn state(experimenter_driven: bool) -> ExperimentState {
        let mut config = TreatmentConfig {
            experimenter_driven,
            ..TreatmentConfig::default()
        };
        let mut timed = RoundConfiguration::new(RoundKind::Regular);
        timed.duration_secs = 30;
        config.rounds = vec![timed, RoundConfiguration::new(RoundKind::Debriefing)];
        let registry = RoundRegistry::new(config.rounds.clone()).unwrap();
        ExperimentState::new(
            "test",
            ExperimentSettings::from(&config),
            registry,
            Arc::new(ParameterRegistry::standard()),
        )
    }

    #[test]
    fn round_data_is_created_once() {
        let mut state = state(false);
        let first = state.ensure_round_data(RoundPointer::first()).unwrap();
        let again = state.ensure_round_data(RoundPointer::first()).unwrap();
        assert_eq!(first, again);
        assert_eq!(state.rounds().count(), 1);
        assert_eq!(state.current_round_id().unwrap(), first);
    }

    #[test]
    fn experimenter_driven_seeds_readiness() {
        let mut state = state(true);
        for _ in 0..3 {
            state.topology.register(ParticipantId::new());
        }
        let round = state.current_round().unwrap().clone();
        state.allocate_groups(&round, false).unwrap();
        let id = state.ensure_round_data(RoundPointer::first()).unwrap();
        let ready = state.params().participant_ready;
        assert_eq!(state.store.active_in_round(id, ready).count(), 0);

        state.seed_readiness().unwrap();
        state.seed_readiness().unwrap();
        let seeded: Vec<_> = state.store.active_in_round(id, ready).collect();
        assert_eq!(seeded.len(), 3);
        assert!(seeded.iter().all(|row| row.value == Value::Bool(false)));
    }

    #[test]
    fn readiness_is_not_tracked_when_participants_drive() {
        let mut state = state(false);
        state.topology.register(ParticipantId::new());
        let round = state.current_round().unwrap().clone();
        state.allocate_groups(&round, false).unwrap();
        let id = state.ensure_round_data(RoundPointer::first()).unwrap();
        state.seed_readiness().unwrap();
        let ready = state.params().participant_ready;
        assert_eq!(state.store.active_in_round(id, ready).count(), 0);
    }

    #[test]
    fn checkpoint_restores_everything() {
        let mut state = state(false);
        let checkpoint = state.checkpoint();
        state.ensure_round_data(RoundPointer::first()).unwrap();
        state.topology.register(ParticipantId::new());
        state.status = ExperimentStatus::Active;
        state.restore(checkpoint);
        assert_eq!(state.status, ExperimentStatus::Inactive);
        assert_eq!(state.rounds().count(), 0);
        assert!(state.topology.participants().is_empty());
    }

    #[test]
    fn time_remaining_counts_down() {
        let mut state = state(false);
        let start = Utc::now();
        state.status = ExperimentStatus::RoundInProgress;
        state.round_started_at = Some(start);
        assert_eq!(state.time_remaining(start + Duration::seconds(10)), Some(20));
        assert!(!state.is_time_expired(start + Duration::seconds(29)));
        assert!(state.is_time_expired(start + Duration::seconds(45)));
        state.status = ExperimentStatus::Active;
        assert_eq!(state.time_remaining(start), None);
    }
}
