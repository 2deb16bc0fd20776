//! Boundary-effects family: optional shared pools, storage and survival.
//!
//! Groups can be clustered to harvest one shared pool. Every participant
//! keeps a storage balance that pays a cost of living each round; a
//! participant who cannot pay dies and harvests nothing from then on.

use rust_decimal::Decimal;
use tracing::info;

use commons_types::{
    ClusterId, ExperimentFamily, GroupId, MembershipId, Owner, RoundConfiguration, RoundKind,
    Value,
};
use commons_world::{
    SettlementContext, freeze_participant, normalize_decisions, pool_capacity, settle_cluster,
    settle_group, settle_participants, shared_capacity,
};

use crate::error::LifecycleError;
use crate::events::RoundReport;
use crate::observer::{RoundLifecycleObserver, assign_values, carry_through, seed_values};
use crate::state::ExperimentState;

const DEFAULT_REGROWTH_RATE: Decimal = Decimal::from_parts(4, 0, 0, false, 1);
const DEFAULT_COST_OF_LIVING: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
const REGULAR_ROUNDS: u32 = 20;
const OTHER_ROUNDS: u32 = 10;

/// Strategy for boundary-effects experiments.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryEffects;

impl BoundaryEffects {
    fn clusters(state: &ExperimentState, session_id: &str) -> Vec<ClusterId> {
        state
            .topology
            .clusters_in_session(session_id)
            .map(|c| c.id)
            .collect()
    }
}

impl RoundLifecycleObserver for BoundaryEffects {
    fn family(&self) -> ExperimentFamily {
        ExperimentFamily::BoundaryEffects
    }

    fn regrowth_rate(&self, state: &ExperimentState, round: &RoundConfiguration) -> Decimal {
        round
            .overrides
            .regrowth_rate
            .or(state.settings.regrowth_rate)
            .unwrap_or(DEFAULT_REGROWTH_RATE)
    }

    fn cost_of_living(&self, state: &ExperimentState, round: &RoundConfiguration) -> Decimal {
        round
            .overrides
            .cost_of_living
            .or(state.settings.cost_of_living)
            .unwrap_or(DEFAULT_COST_OF_LIVING)
    }

    fn capacity(
        &self,
        state: &ExperimentState,
        round: &RoundConfiguration,
    ) -> Result<Decimal, LifecycleError> {
        let group_size = state
            .settings
            .max_group_size
            .unwrap_or_else(|| state.largest_group(&round.session_id));
        let rounds = state.settings.rounds_in_treatment.unwrap_or(match round.kind {
            RoundKind::Regular => REGULAR_ROUNDS,
            _ => OTHER_ROUNDS,
        });
        Ok(pool_capacity(
            round.overrides.initial_resource_level,
            state.settings.initial_resources_per_participant_per_round,
            group_size,
            rounds,
        )?)
    }

    fn max_harvest(&self, state: &ExperimentState, _membership: MembershipId) -> Decimal {
        state.settings.max_harvest_decision
    }

    fn pool_owner(
        &self,
        state: &ExperimentState,
        round: &RoundConfiguration,
        group: GroupId,
    ) -> Owner {
        if round.flags.shared_resource {
            if let Some(cluster) = state.topology.cluster_of(group) {
                return Owner::Cluster(cluster.id);
            }
        }
        Owner::Group(group)
    }

    fn round_started(&self, state: &mut ExperimentState) -> Result<(), LifecycleError> {
        let round = state.current_round()?.clone();
        let repetition = state.pointer.repetition;
        let params = state.params();
        let round_id = state.current_round_id()?;

        let groups = state.session_groups(&round.session_id);
        let group_owners: Vec<Owner> = groups.iter().map(|g| Owner::Group(*g)).collect();
        let clusters = Self::clusters(state, &round.session_id);
        let cluster_owners: Vec<Owner> = clusters.iter().map(|c| Owner::Cluster(*c)).collect();
        let members = state.session_memberships(&round.session_id);
        let member_owners: Vec<Owner> = members.iter().map(|m| Owner::Participant(m.id)).collect();

        if round.should_initialize(repetition) {
            let zero = Value::Decimal(Decimal::ZERO);
            seed_values(
                state,
                round_id,
                &group_owners,
                &[
                    (params.resource_level, zero.clone()),
                    (params.group_harvest, zero.clone()),
                    (params.group_regrowth, zero.clone()),
                ],
            )?;
            seed_values(
                state,
                round_id,
                &cluster_owners,
                &[
                    (params.resource_level, zero.clone()),
                    (params.group_regrowth, zero.clone()),
                ],
            )?;
            seed_values(
                state,
                round_id,
                &member_owners,
                &[(params.storage, zero), (params.player_status, Value::Bool(true))],
            )?;
        }

        if round.should_reset(repetition) {
            let capacity = self.capacity(state, &round)?;
            assign_values(
                state,
                round_id,
                &group_owners,
                &[(params.resource_level, Value::Decimal(capacity))],
            )?;
            for cluster in &clusters {
                let size = state
                    .topology
                    .clusters()
                    .iter()
                    .find(|c| c.id == *cluster)
                    .map_or(0, |c| c.groups.len());
                let shared = shared_capacity(capacity, size)?;
                assign_values(
                    state,
                    round_id,
                    &[Owner::Cluster(*cluster)],
                    &[(params.resource_level, Value::Decimal(shared))],
                )?;
            }
            assign_values(
                state,
                round_id,
                &member_owners,
                &[
                    (params.storage, Value::Decimal(Decimal::ZERO)),
                    (params.player_status, Value::Bool(true)),
                ],
            )?;
            info!(
                experiment = %state.id,
                round = %state.pointer,
                %capacity,
                groups = groups.len(),
                clusters = clusters.len(),
                "resource levels reset"
            );
        } else if round.is_playable() {
            let ctx = SettlementContext {
                params: &params,
                round: round_id,
                next_round: None,
                regrowth_rate: self.regrowth_rate(state, &round),
                capacity: Decimal::ZERO,
                cost_of_living: self.cost_of_living(state, &round),
            };
            let mut frozen: usize = 0;
            for membership in &members {
                let pool = self.pool_owner(state, &round, membership.group_id);
                let depleted = state.decimal(pool, params.resource_level) <= Decimal::ZERO;
                if depleted || !state.is_alive(membership.id) {
                    freeze_participant(&mut state.store, &ctx, membership.id)?;
                    frozen = frozen.saturating_add(1);
                }
            }
            if frozen > 0 {
                info!(experiment = %state.id, round = %state.pointer, frozen, "decisions frozen at zero");
            }
        }
        Ok(())
    }

    fn round_ended(&self, state: &mut ExperimentState) -> Result<RoundReport, LifecycleError> {
        let round = state.current_round()?.clone();
        let params = state.params();
        let groups = state.session_groups(&round.session_id);
        let clusters = Self::clusters(state, &round.session_id);
        let members = state.session_memberships(&round.session_id);

        if !round.is_playable() {
            let mut owners: Vec<Owner> = groups.iter().map(|g| Owner::Group(*g)).collect();
            owners.extend(clusters.iter().map(|c| Owner::Cluster(*c)));
            owners.extend(members.iter().map(|m| Owner::Participant(m.id)));
            carry_through(
                state,
                &owners,
                &[
                    params.resource_level,
                    params.group_harvest,
                    params.group_regrowth,
                    params.storage,
                    params.player_status,
                ],
            )?;
            return Ok(RoundReport::default());
        }

        let round_id = state.current_round_id()?;
        let next_round = state.next_round_id()?;
        let ctx = SettlementContext {
            params: &params,
            round: round_id,
            next_round,
            regrowth_rate: self.regrowth_rate(state, &round),
            capacity: self.capacity(state, &round)?,
            cost_of_living: self.cost_of_living(state, &round),
        };

        let mut report = RoundReport {
            repaired_decisions: normalize_decisions(&mut state.store, &ctx, &members)?,
            ..RoundReport::default()
        };

        if round.flags.shared_resource {
            for cluster in state.topology.clusters_in_session(&round.session_id) {
                report
                    .clusters
                    .push(settle_cluster(&mut state.store, &ctx, &state.topology, cluster)?);
            }
        }
        for group in state.topology.groups_in_session(&round.session_id) {
            let shares_pool =
                round.flags.shared_resource && state.topology.cluster_of(group.id).is_some();
            if !shares_pool {
                report.groups.push(settle_group(&mut state.store, &ctx, group)?);
            }
        }

        report.participants = Some(settle_participants(&mut state.store, &ctx, &members)?);
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use commons_types::{ParameterRegistry, ParticipantId};

    use super::*;
    use crate::config::TreatmentConfig;
    use crate::registry::RoundRegistry;
    use crate::state::ExperimentSettings;

    fn state(max_group_size: u32, rounds: Vec<RoundConfiguration>) -> ExperimentState {
        let config = TreatmentConfig {
            max_group_size,
            rounds,
            ..TreatmentConfig::default()
        };
        ExperimentState::new(
            "boundary",
            ExperimentSettings::from(&config),
            RoundRegistry::new(config.rounds.clone()).unwrap(),
            Arc::new(ParameterRegistry::standard()),
        )
    }

    #[test]
    fn defaults_follow_the_family() {
        let regular = RoundConfiguration::new(RoundKind::Regular);
        let state = state(4, vec![regular.clone()]);
        let strategy = BoundaryEffects;
        assert_eq!(strategy.regrowth_rate(&state, &regular), dec!(0.4));
        assert_eq!(strategy.cost_of_living(&state, &regular), dec!(5));
        assert_eq!(strategy.max_harvest(&state, MembershipId::new()), dec!(10));
        assert_eq!(strategy.capacity(&state, &regular).unwrap(), dec!(240));

        let practice = RoundConfiguration::new(RoundKind::Practice);
        assert_eq!(strategy.capacity(&state, &practice).unwrap(), dec!(120));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut regular = RoundConfiguration::new(RoundKind::Regular);
        regular.overrides.regrowth_rate = Some(dec!(0.2));
        regular.overrides.initial_resource_level = Some(dec!(50));
        let state = state(4, vec![regular.clone()]);
        assert_eq!(BoundaryEffects.regrowth_rate(&state, &regular), dec!(0.2));
        assert_eq!(BoundaryEffects.capacity(&state, &regular).unwrap(), dec!(50));
    }

    #[test]
    fn unbounded_groups_size_capacity_from_largest_group() {
        let regular = RoundConfiguration::new(RoundKind::Regular);
        let mut state = state(0, vec![regular.clone()]);
        for _ in 0..6 {
            state.topology.register(ParticipantId::new());
        }
        state.allocate_groups(&regular, false).unwrap();
        assert_eq!(BoundaryEffects.capacity(&state, &regular).unwrap(), dec!(360));
    }
}
