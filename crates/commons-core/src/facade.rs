//! Participant-facing entry points and read-only queries.
//!
//! Submissions are validated here and rejected before they reach the
//! engine: decisions are only accepted while a playable round is in
//! progress, from living participants, within `0..=max`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use commons_store::ValueKey;
use commons_types::{
    DataValue, ExperimentStatus, Group, GroupId, MembershipId, Owner, ParameterId,
    ParticipantViewModel, PlayerData, PoolStats, RoundConfiguration, RoundDataId, Value,
};
use commons_world::{DynamicsError, decimal_or_zero};

use crate::error::{LifecycleError, SubmissionError};
use crate::experiment::Experiment;

impl Experiment {
    // -----------------------------------------------------------------------
    // Submissions
    // -----------------------------------------------------------------------

    /// Record `membership`'s harvest decision for the current round.
    ///
    /// Each call supersedes the previous decision; `is_final` marks it
    /// submitted.
    pub fn submit_harvest_decision(
        &mut self,
        membership: MembershipId,
        amount: Decimal,
        is_final: bool,
    ) -> Result<(), SubmissionError> {
        if self.state.status != ExperimentStatus::RoundInProgress {
            return Err(SubmissionError::RoundNotInProgress);
        }
        if !self.state.current_round()?.is_playable() {
            return Err(SubmissionError::NotPlayable);
        }
        self.require_current_member(membership)?;
        if !self.state.is_alive(membership) {
            return Err(SubmissionError::ParticipantDead(membership));
        }
        let max = self.observer.max_harvest(&self.state, membership);
        if amount < Decimal::ZERO || amount > max {
            return Err(SubmissionError::OutOfRange { amount, max });
        }

        let key = self.state.current_key(
            Owner::Participant(membership),
            self.state.params().harvest_decision,
        )?;
        self.state
            .store
            .supersede(key, Value::Decimal(amount), is_final)?;
        debug!(
            experiment = %self.state.id,
            %membership,
            %amount,
            is_final,
            "harvest decision recorded"
        );
        Ok(())
    }

    /// Mark `membership` ready for the current round.
    pub fn set_participant_ready(&mut self, membership: MembershipId) -> Result<(), SubmissionError> {
        self.require_current_member(membership)?;
        let key = self.state.current_key(
            Owner::Participant(membership),
            self.state.params().participant_ready,
        )?;
        self.state.store.set(key, Value::Bool(true))?;
        debug!(experiment = %self.state.id, %membership, "participant ready");
        Ok(())
    }

    /// `membership` must belong to a group of the current round's session.
    fn require_current_member(&self, membership: MembershipId) -> Result<(), SubmissionError> {
        let session = &self.state.current_round()?.session_id;
        match self.state.topology.membership(membership) {
            Ok((group, _)) if group.session_id == *session => Ok(()),
            _ => Err(SubmissionError::UnknownParticipant(membership)),
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    fn current_members(&self) -> Vec<MembershipId> {
        self.state
            .current_round()
            .map(|round| {
                self.state
                    .session_memberships(&round.session_id)
                    .iter()
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Participants marked ready in the current round.
    pub fn number_of_ready_participants(&self) -> usize {
        let ready = self.state.params().participant_ready;
        self.current_members()
            .into_iter()
            .filter(|m| self.state.flag(Owner::Participant(*m), ready, false))
            .count()
    }

    /// Whether every participant of the current session is ready.
    pub fn all_participants_ready(&self) -> bool {
        self.number_of_ready_participants() >= self.current_members().len()
    }

    /// Participants whose current decision has been submitted.
    pub fn number_of_submitted_decisions(&self) -> usize {
        let decision = self.state.params().harvest_decision;
        self.current_members()
            .into_iter()
            .filter(|m| {
                self.state
                    .current_key(Owner::Participant(*m), decision)
                    .ok()
                    .and_then(|key| self.state.store.get(&key))
                    .is_some_and(|row| row.submitted)
            })
            .count()
    }

    /// Whether every participant of the current session has submitted.
    pub fn all_participants_submitted(&self) -> bool {
        self.number_of_submitted_decisions() >= self.current_members().len()
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Largest harvest `membership` may currently request.
    pub fn max_harvest(&self, membership: MembershipId) -> Decimal {
        self.observer.max_harvest(&self.state, membership)
    }

    /// Snapshot of the current round for one participant's screen.
    pub fn view_model(
        &self,
        membership: MembershipId,
        now: DateTime<Utc>,
    ) -> Result<ParticipantViewModel, LifecycleError> {
        let (group, _) = self.state.topology.membership(membership)?;
        let round = self.state.current_round()?;
        let params = self.state.params();
        let owner = Owner::Participant(membership);
        let decision = self
            .state
            .current_key(owner, params.harvest_decision)
            .ok()
            .and_then(|key| self.state.store.get(&key));

        let my_group = self.pool_stats(round, group)?;
        let can_observe_other_group = round.flags.observe_other_group;
        let other_group = if can_observe_other_group {
            self.state
                .topology
                .related_group(group.id)
                .map(|id| self.state.topology.group(id))
                .transpose()?
                .map(|g| self.pool_stats(round, g))
                .transpose()?
        } else {
            None
        };

        Ok(ParticipantViewModel {
            membership_id: membership,
            round_kind: round.kind,
            pointer: self.state.pointer,
            round_in_progress: self.state.status == ExperimentStatus::RoundInProgress,
            time_remaining_secs: self.state.time_remaining(now),
            regrowth_rate: self.observer.regrowth_rate(&self.state, round),
            cost_of_living: self.observer.cost_of_living(&self.state, round),
            max_harvest_decision: self.observer.max_harvest(&self.state, membership),
            submitted: decision.is_some_and(|row| row.submitted),
            harvest_decision: decision
                .and_then(DataValue::decimal)
                .unwrap_or(Decimal::ZERO),
            storage: self.state.decimal(owner, params.storage),
            alive: self.state.is_alive(membership),
            resource_level: my_group.resource_level,
            my_group,
            other_group,
            can_observe_other_group,
            chat_enabled: round.flags.chat_enabled,
        })
    }

    /// Pool statistics for `group` in the current round.
    fn pool_stats(
        &self,
        round: &RoundConfiguration,
        group: &Group,
    ) -> Result<PoolStats, LifecycleError> {
        let params = self.state.params();
        let pool = self.observer.pool_owner(&self.state, round, group.id);
        let resource_level = self.state.decimal(pool, params.resource_level);
        let regrowth = self.state.decimal(pool, params.group_regrowth);

        let mut total_harvest = Decimal::ZERO;
        let mut total_storage = Decimal::ZERO;
        let mut number_alive: u32 = 0;
        for member in &group.members {
            let owner = Owner::Participant(member.id);
            total_harvest = total_harvest
                .checked_add(self.state.decimal(owner, params.harvest_decision))
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            total_storage = total_storage
                .checked_add(self.state.decimal(owner, params.storage))
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            if self.state.is_alive(member.id) {
                number_alive = number_alive.saturating_add(1);
            }
        }
        let group_size = u32::try_from(group.size()).unwrap_or(u32::MAX);
        let average = |total: Decimal| {
            total
                .checked_div(Decimal::from(group_size))
                .unwrap_or(Decimal::ZERO)
        };

        Ok(PoolStats {
            group_id: group.id,
            resource_level,
            regrowth,
            original_resource_level: resource_level
                .checked_sub(regrowth)
                .ok_or(DynamicsError::ArithmeticOverflow)?,
            average_harvest: average(total_harvest),
            average_storage: average(total_storage),
            number_alive,
            group_size,
            is_resource_empty: resource_level <= Decimal::ZERO,
        })
    }

    /// Per-member table for `group`: latest decision, alive flag, storage.
    pub fn player_data(&self, group: GroupId) -> Result<Vec<PlayerData>, LifecycleError> {
        let group = self.state.topology.group(group)?;
        let params = self.state.params();
        Ok(group
            .members
            .iter()
            .map(|member| {
                let owner = Owner::Participant(member.id);
                PlayerData {
                    membership_id: member.id,
                    participant_id: member.participant_id,
                    participant_number: member.participant_number,
                    last_harvest_decision: self.latest_decision(member.id),
                    alive: self.state.is_alive(member.id),
                    storage: self.state.decimal(owner, params.storage),
                }
            })
            .collect())
    }

    /// Most recent active decision of `membership` in any round so far.
    fn latest_decision(&self, membership: MembershipId) -> Decimal {
        let decision = self.state.params().harvest_decision;
        self.state
            .rounds()
            .rev()
            .filter(|r| r.pointer <= self.state.pointer)
            .find_map(|r| {
                let key = ValueKey::new(Owner::Participant(membership), r.id, decision);
                self.state.store.get(&key).and_then(DataValue::decimal)
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of `membership`'s active harvest decisions across the rounds of
    /// `session_id`.
    pub fn total_harvest(
        &self,
        membership: MembershipId,
        session_id: &str,
    ) -> Result<Decimal, LifecycleError> {
        let in_session: BTreeSet<RoundDataId> = self
            .state
            .rounds()
            .filter(|r| {
                self.state
                    .registry
                    .get(r.pointer.sequence_number)
                    .is_ok_and(|c| c.session_id == session_id && c.is_playable())
            })
            .map(|r| r.id)
            .collect();
        let decision = self.state.params().harvest_decision;
        self.state
            .store
            .active_for_owner(Owner::Participant(membership), decision)
            .filter(|row| in_session.contains(&row.round))
            .filter_map(DataValue::decimal)
            .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
            .ok_or_else(|| DynamicsError::ArithmeticOverflow.into())
    }

    /// Load rows exactly as an external persistence layer holds them.
    ///
    /// Duplicate active rows loaded here are repaired at the next read or
    /// round-end normalization.
    pub fn import_values(&mut self, rows: impl IntoIterator<Item = (DataValue, bool)>) -> usize {
        let mut imported: usize = 0;
        for (row, active) in rows {
            self.state.store.import(row, active);
            imported = imported.saturating_add(1);
        }
        debug!(experiment = %self.state.id, imported, "values imported");
        imported
    }

    /// Active decimal for `owner`'s `parameter` in an arbitrary round.
    pub fn value_in_round(
        &self,
        owner: Owner,
        round: RoundDataId,
        parameter: ParameterId,
    ) -> Decimal {
        decimal_or_zero(
            &self.state.store,
            &ValueKey::new(owner, round, parameter),
        )
    }
}
