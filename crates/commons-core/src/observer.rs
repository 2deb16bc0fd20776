//! Family-specific round lifecycle strategies.
//!
//! The lifecycle controller calls a [`RoundLifecycleObserver`] after a round
//! starts and when it ends. Each experiment family decides what values it
//! tracks, how pools are sized, and how settlement runs. Use
//! [`observer_for`] to pick the strategy for a family.

use rust_decimal::Decimal;

use commons_store::ValueKey;
use commons_types::{
    ExperimentFamily, GroupId, MembershipId, Owner, ParameterId, RoundConfiguration, RoundDataId,
    Value,
};

use crate::error::LifecycleError;
use crate::events::RoundReport;
use crate::families::{BoundaryEffects, Forestry};
use crate::state::ExperimentState;

/// Strategy that runs at round boundaries for one experiment family.
pub trait RoundLifecycleObserver: Send {
    /// The family this strategy implements.
    fn family(&self) -> ExperimentFamily;

    /// Regrowth rate in effect for `round`.
    fn regrowth_rate(&self, state: &ExperimentState, round: &RoundConfiguration) -> Decimal;

    /// Storage deducted from each participant at the end of `round`.
    fn cost_of_living(&self, state: &ExperimentState, round: &RoundConfiguration) -> Decimal;

    /// Capacity of one group's pool in `round`.
    fn capacity(
        &self,
        state: &ExperimentState,
        round: &RoundConfiguration,
    ) -> Result<Decimal, LifecycleError>;

    /// Largest harvest `membership` may currently request.
    fn max_harvest(&self, state: &ExperimentState, membership: MembershipId) -> Decimal;

    /// Which pool `group` harvests from in `round`.
    fn pool_owner(
        &self,
        _state: &ExperimentState,
        _round: &RoundConfiguration,
        group: GroupId,
    ) -> Owner {
        Owner::Group(group)
    }

    /// Seed, reset or freeze values after the round's data has been created.
    fn round_started(&self, state: &mut ExperimentState) -> Result<(), LifecycleError>;

    /// Settle the round and carry results into the next one.
    fn round_ended(&self, state: &mut ExperimentState) -> Result<RoundReport, LifecycleError>;
}

/// The strategy for `family`.
pub fn observer_for(family: ExperimentFamily) -> Box<dyn RoundLifecycleObserver> {
    match family {
        ExperimentFamily::Forestry => Box::new(Forestry),
        ExperimentFamily::BoundaryEffects => Box::new(BoundaryEffects),
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the family strategies
// ---------------------------------------------------------------------------

/// Create each `(parameter, default)` for every owner unless already present.
pub(crate) fn seed_values(
    state: &mut ExperimentState,
    round: RoundDataId,
    owners: &[Owner],
    defaults: &[(ParameterId, Value)],
) -> Result<(), LifecycleError> {
    for owner in owners {
        for (parameter, default) in defaults {
            let key = ValueKey::new(*owner, round, *parameter);
            state.store.get_or_create(key, Some(default.clone()))?;
        }
    }
    Ok(())
}

/// Overwrite each `(parameter, value)` for every owner in place.
pub(crate) fn assign_values(
    state: &mut ExperimentState,
    round: RoundDataId,
    owners: &[Owner],
    values: &[(ParameterId, Value)],
) -> Result<(), LifecycleError> {
    for owner in owners {
        for (parameter, value) in values {
            state
                .store
                .set(ValueKey::new(*owner, round, *parameter), value.clone())?;
        }
    }
    Ok(())
}

/// Copy whatever values exist for `parameters` into the next round.
///
/// Rounds that do not settle use this so pool levels and balances survive
/// chat, quiz and survey rounds.
pub(crate) fn carry_through(
    state: &mut ExperimentState,
    owners: &[Owner],
    parameters: &[ParameterId],
) -> Result<usize, LifecycleError> {
    let Some(next) = state.next_round_id()? else {
        return Ok(0);
    };
    let round = state.current_round_id()?;
    let mut carried: usize = 0;
    for owner in owners {
        for parameter in parameters {
            let key = ValueKey::new(*owner, round, *parameter);
            if state.store.get(&key).is_some() {
                state.store.carry_forward(&key, next)?;
                carried = carried.saturating_add(1);
            }
        }
    }
    Ok(carried)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_strategy_by_family() {
        assert_eq!(
            observer_for(ExperimentFamily::Forestry).family(),
            ExperimentFamily::Forestry
        );
        assert_eq!(
            observer_for(ExperimentFamily::BoundaryEffects).family(),
            ExperimentFamily::BoundaryEffects
        );
    }
}
