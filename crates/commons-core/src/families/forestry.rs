//! Forestry family: one forest per group, stepped harvest limits.
//!
//! Only group pools are tracked. There is no storage, cost of living or
//! survival, and pools are never shared between groups.

use rust_decimal::Decimal;
use tracing::info;

use commons_types::{ExperimentFamily, MembershipId, Owner, RoundConfiguration, Value};
use commons_world::{SettlementContext, forestry_max_harvest, normalize_decisions, settle_group};

use crate::error::LifecycleError;
use crate::events::RoundReport;
use crate::observer::{RoundLifecycleObserver, assign_values, carry_through, seed_values};
use crate::state::ExperimentState;

const DEFAULT_REGROWTH_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
const DEFAULT_CAPACITY: Decimal = Decimal::ONE_HUNDRED;

/// Strategy for forestry experiments.
///
/// Forests regrow logistically toward capacity, the same curve as
/// boundary-effects pools, at a default rate of 0.1. They do not regrow by a
/// flat tenth of the remaining level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forestry;

impl RoundLifecycleObserver for Forestry {
    fn family(&self) -> ExperimentFamily {
        ExperimentFamily::Forestry
    }

    fn regrowth_rate(&self, state: &ExperimentState, round: &RoundConfiguration) -> Decimal {
        round
            .overrides
            .regrowth_rate
            .or(state.settings.regrowth_rate)
            .unwrap_or(DEFAULT_REGROWTH_RATE)
    }

    fn cost_of_living(&self, _state: &ExperimentState, _round: &RoundConfiguration) -> Decimal {
        Decimal::ZERO
    }

    fn capacity(
        &self,
        _state: &ExperimentState,
        round: &RoundConfiguration,
    ) -> Result<Decimal, LifecycleError> {
        Ok(round
            .overrides
            .initial_resource_level
            .unwrap_or(DEFAULT_CAPACITY))
    }

    fn max_harvest(&self, state: &ExperimentState, membership: MembershipId) -> Decimal {
        state
            .topology
            .membership(membership)
            .map_or(Decimal::ZERO, |(group, _)| {
                forestry_max_harvest(
                    state.decimal(Owner::Group(group.id), state.params().resource_level),
                )
            })
    }

    fn round_started(&self, state: &mut ExperimentState) -> Result<(), LifecycleError> {
        let round = state.current_round()?.clone();
        let repetition = state.pointer.repetition;
        let params = state.params();
        let round_id = state.current_round_id()?;
        let capacity = self.capacity(state, &round)?;
        let owners: Vec<Owner> = state
            .session_groups(&round.session_id)
            .into_iter()
            .map(Owner::Group)
            .collect();

        if round.should_initialize(repetition) {
            seed_values(
                state,
                round_id,
                &owners,
                &[
                    (params.group_regrowth, Value::Decimal(Decimal::ZERO)),
                    (params.group_harvest, Value::Decimal(Decimal::ZERO)),
                    (params.resource_level, Value::Decimal(capacity)),
                ],
            )?;
        }
        if round.should_reset(repetition) {
            assign_values(
                state,
                round_id,
                &owners,
                &[(params.resource_level, Value::Decimal(capacity))],
            )?;
            info!(
                experiment = %state.id,
                round = %state.pointer,
                %capacity,
                forests = owners.len(),
                "forests reset"
            );
        }
        Ok(())
    }

    fn round_ended(&self, state: &mut ExperimentState) -> Result<RoundReport, LifecycleError> {
        let round = state.current_round()?.clone();
        let params = state.params();

        if !round.is_playable() {
            let owners: Vec<Owner> = state
                .session_groups(&round.session_id)
                .into_iter()
                .map(Owner::Group)
                .collect();
            carry_through(
                state,
                &owners,
                &[
                    params.resource_level,
                    params.group_harvest,
                    params.group_regrowth,
                ],
            )?;
            return Ok(RoundReport::default());
        }

        let members = state.session_memberships(&round.session_id);
        let round_id = state.current_round_id()?;
        let next_round = state.next_round_id()?;
        let ctx = SettlementContext {
            params: &params,
            round: round_id,
            next_round,
            regrowth_rate: self.regrowth_rate(state, &round),
            capacity: self.capacity(state, &round)?,
            cost_of_living: Decimal::ZERO,
        };

        let mut report = RoundReport {
            repaired_decisions: normalize_decisions(&mut state.store, &ctx, &members)?,
            ..RoundReport::default()
        };
        for group in state.topology.groups_in_session(&round.session_id) {
            report.groups.push(settle_group(&mut state.store, &ctx, group)?);
        }
        Ok(report)
    }
}
