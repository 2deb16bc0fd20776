//! Round-end settlement of pools and participants against the data store.
//!
//! Each function here reads the active values it needs, runs the pure
//! arithmetic from [`crate::dynamics`], and writes results back: decisions
//! that had to change are superseded, pool values are recorded in the
//! current round and carried into the next round when one exists.
//!
//! Which of these functions run, and in what order, is decided by the
//! experiment family's lifecycle strategy.

use rust_decimal::Decimal;
use tracing::{debug, info};

use commons_store::{DataStore, ValueKey};
use commons_types::{
    DataValue, Group, GroupCluster, GroupId, Membership, MembershipId, Owner, ParameterId,
    RoundDataId, SimulationParameters, Value,
};

use crate::dynamics::{self, LevelUpdate};
use crate::error::{DynamicsError, WorldError};
use crate::topology::Topology;

/// Everything settlement needs to know about the round being closed.
#[derive(Debug, Clone, Copy)]
pub struct SettlementContext<'a> {
    /// Parameter handles.
    pub params: &'a SimulationParameters,
    /// Round being settled.
    pub round: RoundDataId,
    /// Round that results are carried into, if any.
    pub next_round: Option<RoundDataId>,
    /// Logistic regrowth rate.
    pub regrowth_rate: Decimal,
    /// Capacity of a single group's pool.
    pub capacity: Decimal,
    /// Storage deducted from each living participant.
    pub cost_of_living: Decimal,
}

impl SettlementContext<'_> {
    /// Key for `owner`'s `parameter` in the round being settled.
    pub const fn key(&self, owner: Owner, parameter: ParameterId) -> ValueKey {
        ValueKey::new(owner, self.round, parameter)
    }

    const fn decision_key(&self, membership: MembershipId) -> ValueKey {
        self.key(Owner::Participant(membership), self.params.harvest_decision)
    }
}

/// Outcome of settling one group's own pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSettlement {
    /// The group.
    pub group_id: GroupId,
    /// Level before harvest.
    pub starting_level: Decimal,
    /// Harvest actually removed (after rationing).
    pub harvest: Decimal,
    /// Regrowth added.
    pub regrowth: Decimal,
    /// Level after harvest, regrowth and clamping.
    pub resource_level: Decimal,
    /// Whether any decision was rationed or zeroed.
    pub adjusted: bool,
}

/// Outcome of settling one cluster's shared pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettlement {
    /// Level before harvest.
    pub starting_level: Decimal,
    /// Per-group harvest in processing order.
    pub group_harvests: Vec<(GroupId, Decimal)>,
    /// Regrowth added once to the shared pool.
    pub regrowth: Decimal,
    /// Final shared level.
    pub resource_level: Decimal,
}

/// Outcome of settling participant storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParticipantSettlement {
    /// Participants alive after settlement.
    pub alive: usize,
    /// Participants who died this round.
    pub died: usize,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Active decimal value for `key`, or zero if there is none.
pub fn decimal_or_zero(store: &DataStore, key: &ValueKey) -> Decimal {
    store
        .get(key)
        .and_then(DataValue::decimal)
        .unwrap_or(Decimal::ZERO)
}

/// Active decimal value for `key`, created as zero if missing.
fn ensure_decimal(store: &mut DataStore, key: ValueKey) -> Result<Decimal, WorldError> {
    store
        .get_or_create(key, Some(Value::Decimal(Decimal::ZERO)))?
        .decimal()
        .ok_or(WorldError::UnexpectedValue {
            what: "pool quantity",
            expected: "a number",
        })
}

/// Active decisions of every member of `group`, in membership order.
pub fn group_decisions(
    store: &DataStore,
    ctx: &SettlementContext<'_>,
    group: &Group,
) -> Vec<(MembershipId, Decimal)> {
    group
        .members
        .iter()
        .map(|m| (m.id, decimal_or_zero(store, &ctx.decision_key(m.id))))
        .collect()
}

/// Sum of the active decisions of every member of `group`.
pub fn group_harvest_total(
    store: &DataStore,
    ctx: &SettlementContext<'_>,
    group: &Group,
) -> Result<Decimal, WorldError> {
    group_decisions(store, ctx, group)
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, (_, amount)| acc.checked_add(amount))
        .ok_or_else(|| DynamicsError::ArithmeticOverflow.into())
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Make sure every member has exactly one active harvest decision.
///
/// A missing decision becomes an unsubmitted zero; duplicates collapse to
/// the most recent. Returns the number of members repaired.
pub fn normalize_decisions(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    members: &[Membership],
) -> Result<usize, WorldError> {
    let mut repaired: usize = 0;
    for membership in members {
        let key = ctx.decision_key(membership.id);
        let active = store.history(&key).iter().filter(|v| v.active).count();
        match active {
            0 => {
                store.set(key, Value::Decimal(Decimal::ZERO))?;
                debug!(membership = %membership.id, "missing decision recorded as zero");
                repaired = repaired.saturating_add(1);
            }
            1 => {}
            _ => {
                store.normalize(&key);
                repaired = repaired.saturating_add(1);
            }
        }
    }
    Ok(repaired)
}

/// Supersede `membership`'s decision with a submitted zero and mark it ready.
pub fn freeze_participant(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    membership: MembershipId,
) -> Result<(), WorldError> {
    store.supersede(ctx.decision_key(membership), Value::Decimal(Decimal::ZERO), true)?;
    store.set(
        ctx.key(Owner::Participant(membership), ctx.params.participant_ready),
        Value::Bool(true),
    )?;
    Ok(())
}

/// Force every member's decision to a submitted zero.
fn zero_decisions(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    group: &Group,
) -> Result<(), WorldError> {
    for membership in &group.members {
        store.supersede(
            ctx.decision_key(membership.id),
            Value::Decimal(Decimal::ZERO),
            true,
        )?;
    }
    Ok(())
}

/// Ration `group`'s decisions against `level`, superseding changed ones.
///
/// Returns the total granted harvest.
pub fn ration_group(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    group: &Group,
    level: Decimal,
    pool_size: usize,
) -> Result<Decimal, WorldError> {
    let decisions = group_decisions(store, ctx, group);
    let rationing = dynamics::ration(level, pool_size, &decisions)?;
    for allocation in rationing.allocations.iter().filter(|a| a.is_rationed()) {
        debug!(
            group = group.number,
            membership = %allocation.key,
            requested = %allocation.requested,
            granted = %allocation.granted,
            "harvest decision rationed"
        );
        store.supersede(
            ctx.decision_key(allocation.key),
            Value::Decimal(allocation.granted),
            true,
        )?;
    }
    info!(
        group = group.number,
        %level,
        pool_size,
        harvest = %rationing.total,
        "group harvest adjusted"
    );
    Ok(rationing.total)
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// Settle one group's own pool.
///
/// An exhausted pool stays exhausted: decisions are zeroed and neither
/// harvest nor regrowth is applied.
pub fn settle_group(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    group: &Group,
) -> Result<GroupSettlement, WorldError> {
    let owner = Owner::Group(group.id);
    let level_key = ctx.key(owner, ctx.params.resource_level);
    let harvest_key = ctx.key(owner, ctx.params.group_harvest);
    let regrowth_key = ctx.key(owner, ctx.params.group_regrowth);

    let level = ensure_decimal(store, level_key)?;
    let (harvest, update, adjusted) = if level > Decimal::ZERO {
        let total = group_harvest_total(store, ctx, group)?;
        let (harvest, adjusted) = if total > level {
            (ration_group(store, ctx, group, level, group.size())?, true)
        } else {
            (total, false)
        };
        let update = dynamics::apply_harvest(level, harvest, ctx.regrowth_rate, ctx.capacity)?;
        info!(
            group = group.number,
            %level,
            %harvest,
            regrowth = %update.regrowth,
            new_level = %update.new_level,
            "group pool settled"
        );
        (harvest, update, adjusted)
    } else {
        info!(group = group.number, "resource exhausted, no one can harvest");
        zero_decisions(store, ctx, group)?;
        let update = LevelUpdate {
            after_harvest: Decimal::ZERO,
            regrowth: Decimal::ZERO,
            new_level: level.max(Decimal::ZERO),
        };
        (Decimal::ZERO, update, true)
    };

    store.set(harvest_key, Value::Decimal(harvest))?;
    store.set(regrowth_key, Value::Decimal(update.regrowth))?;
    if update.new_level != level {
        store.supersede(level_key, Value::Decimal(update.new_level), false)?;
    }

    if let Some(next) = ctx.next_round {
        for key in [level_key, harvest_key, regrowth_key] {
            store.carry_forward(&key, next)?;
        }
    }

    Ok(GroupSettlement {
        group_id: group.id,
        starting_level: level,
        harvest,
        regrowth: update.regrowth,
        resource_level: update.new_level,
        adjusted,
    })
}

/// Settle a cluster's shared pool.
///
/// Each member group's harvest is totalled first. If together they exceed
/// the shared level, each group is rationed in turn against whatever the
/// groups before it left, using the cluster's total membership as the pool
/// size. Regrowth is applied once, against the cluster-scaled capacity.
pub fn settle_cluster(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    topology: &Topology,
    cluster: &GroupCluster,
) -> Result<ClusterSettlement, WorldError> {
    let groups = cluster
        .groups
        .iter()
        .map(|id| topology.group(*id))
        .collect::<Result<Vec<&Group>, _>>()?;
    let pool_size = topology.cluster_member_count(cluster);
    let capacity = dynamics::shared_capacity(ctx.capacity, groups.len())?;

    let owner = Owner::Cluster(cluster.id);
    let level_key = ctx.key(owner, ctx.params.resource_level);
    let regrowth_key = ctx.key(owner, ctx.params.group_regrowth);
    let starting_level = ensure_decimal(store, level_key)?;

    let mut group_harvests = Vec::with_capacity(groups.len());
    let (regrowth, resource_level) = if starting_level > Decimal::ZERO {
        let mut totals = Vec::with_capacity(groups.len());
        let mut cluster_harvest = Decimal::ZERO;
        for group in &groups {
            let total = group_harvest_total(store, ctx, group)?;
            debug!(group = group.number, harvest = %total, "group harvest from shared pool");
            cluster_harvest = cluster_harvest
                .checked_add(total)
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            totals.push(total);
        }
        let oversubscribed = cluster_harvest > starting_level;

        let mut level = starting_level;
        for (group, total) in groups.iter().zip(totals) {
            let harvest = if oversubscribed {
                ration_group(store, ctx, group, level, pool_size)?
            } else {
                total
            };
            store.set(
                ctx.key(Owner::Group(group.id), ctx.params.group_harvest),
                Value::Decimal(harvest),
            )?;
            level = level
                .checked_sub(harvest)
                .ok_or(DynamicsError::ArithmeticOverflow)?
                .max(Decimal::ZERO);
            group_harvests.push((group.id, harvest));
        }

        let regrowth = dynamics::calculate_regrowth(level, ctx.regrowth_rate, capacity)?;
        let new_level = level
            .checked_add(regrowth)
            .ok_or(DynamicsError::ArithmeticOverflow)?
            .min(capacity);
        info!(
            cluster = %cluster.id,
            level = %starting_level,
            harvest = %cluster_harvest,
            %regrowth,
            %new_level,
            "shared pool settled"
        );
        (regrowth, new_level)
    } else {
        info!(cluster = %cluster.id, "shared resource exhausted, no one can harvest");
        for group in &groups {
            zero_decisions(store, ctx, group)?;
            store.set(
                ctx.key(Owner::Group(group.id), ctx.params.group_harvest),
                Value::Decimal(Decimal::ZERO),
            )?;
            group_harvests.push((group.id, Decimal::ZERO));
        }
        (Decimal::ZERO, starting_level.max(Decimal::ZERO))
    };

    store.set(regrowth_key, Value::Decimal(regrowth))?;
    if resource_level != starting_level {
        store.supersede(level_key, Value::Decimal(resource_level), false)?;
    }
    if let Some(next) = ctx.next_round {
        store.carry_forward(&level_key, next)?;
        store.carry_forward(&regrowth_key, next)?;
    }

    Ok(ClusterSettlement {
        starting_level,
        group_harvests,
        regrowth,
        resource_level,
    })
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Pay each living participant their harvest less the cost of living.
///
/// A participant whose storage would go negative dies and keeps zero
/// storage. Status and storage are carried forward for everyone.
pub fn settle_participants<'m>(
    store: &mut DataStore,
    ctx: &SettlementContext<'_>,
    memberships: impl IntoIterator<Item = &'m Membership>,
) -> Result<ParticipantSettlement, WorldError> {
    let mut summary = ParticipantSettlement::default();
    for membership in memberships {
        let owner = Owner::Participant(membership.id);
        let status_key = ctx.key(owner, ctx.params.player_status);
        let storage_key = ctx.key(owner, ctx.params.storage);

        let mut alive = store
            .get_or_create(status_key, Some(Value::Bool(true)))?
            .value
            .as_bool()
            .unwrap_or(true);
        let storage = ensure_decimal(store, storage_key)?;

        if alive {
            let harvest = decimal_or_zero(store, &ctx.decision_key(membership.id));
            let updated = storage
                .checked_add(harvest)
                .and_then(|v| v.checked_sub(ctx.cost_of_living))
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            if updated < Decimal::ZERO {
                alive = false;
                store.set(status_key, Value::Bool(false))?;
                summary.died = summary.died.saturating_add(1);
                info!(membership = %membership.id, %storage, %harvest, "participant died");
            }
            store.set(storage_key, Value::Decimal(updated.max(Decimal::ZERO)))?;
        }
        if alive {
            summary.alive = summary.alive.saturating_add(1);
        }

        if let Some(next) = ctx.next_round {
            store.carry_forward(&status_key, next)?;
            store.carry_forward(&storage_key, next)?;
        }
    }
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    use commons_types::{ParameterRegistry, ParticipantId};

    use super::*;
    use crate::topology::AllocationRequest;

    fn topology(participants: usize, group_size: u32) -> Topology {
        let mut topology = Topology::new();
        for _ in 0..participants {
            topology.register(ParticipantId::new());
        }
        let request = AllocationRequest {
            max_group_size: Some(group_size),
            session_id: String::new(),
            randomize: false,
            preserve_existing_groups: false,
        };
        topology
            .allocate_groups(&request, &mut StdRng::seed_from_u64(11))
            .unwrap();
        topology
    }

    fn context(params: &SimulationParameters, rate: Decimal, capacity: Decimal) -> SettlementContext<'_> {
        SettlementContext {
            params,
            round: RoundDataId::new(),
            next_round: Some(RoundDataId::new()),
            regrowth_rate: rate,
            capacity,
            cost_of_living: dec!(5),
        }
    }

    fn decide(store: &mut DataStore, ctx: &SettlementContext<'_>, group: &Group, amounts: &[Decimal]) {
        for (membership, amount) in group.members.iter().zip(amounts) {
            store
                .supersede(ctx.decision_key(membership.id), Value::Decimal(*amount), true)
                .unwrap();
        }
    }

    #[test]
    fn oversubscribed_group_is_rationed_to_empty() {
        let registry = ParameterRegistry::standard();
        let topology = topology(4, 4);
        let group = topology.groups().first().unwrap();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.4), dec!(120));
        store
            .set(ctx.key(Owner::Group(group.id), ctx.params.resource_level), Value::Decimal(dec!(40)))
            .unwrap();
        decide(&mut store, &ctx, group, &[dec!(15), dec!(15), dec!(15), dec!(15)]);

        let outcome = settle_group(&mut store, &ctx, group).unwrap();
        assert_eq!(outcome.harvest, dec!(40));
        assert_eq!(outcome.regrowth, Decimal::ZERO);
        assert_eq!(outcome.resource_level, Decimal::ZERO);
        for (_, amount) in group_decisions(&store, &ctx, group) {
            assert_eq!(amount, dec!(10));
        }
    }

    #[test]
    fn full_pool_single_harvest() {
        let registry = ParameterRegistry::standard();
        let topology = topology(1, 1);
        let group = topology.groups().first().unwrap();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.1), dec!(100));
        let level_key = ctx.key(Owner::Group(group.id), ctx.params.resource_level);
        store.set(level_key, Value::Decimal(dec!(100))).unwrap();
        decide(&mut store, &ctx, group, &[dec!(20)]);

        let outcome = settle_group(&mut store, &ctx, group).unwrap();
        assert_eq!(outcome.harvest, dec!(20));
        assert_eq!(outcome.regrowth, dec!(1.6));
        assert_eq!(outcome.resource_level, dec!(81.6));
        let next = level_key.in_round(ctx.next_round.unwrap());
        assert_eq!(decimal_or_zero(&store, &next), dec!(81.6));
    }

    #[test]
    fn exhausted_pool_zeroes_decisions() {
        let registry = ParameterRegistry::standard();
        let topology = topology(2, 2);
        let group = topology.groups().first().unwrap();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.4), dec!(100));
        decide(&mut store, &ctx, group, &[dec!(5), dec!(3)]);

        let outcome = settle_group(&mut store, &ctx, group).unwrap();
        assert_eq!(outcome.harvest, Decimal::ZERO);
        assert_eq!(outcome.resource_level, Decimal::ZERO);
        for membership in &group.members {
            let row = store.get(&ctx.decision_key(membership.id)).unwrap();
            assert!(row.submitted);
            assert_eq!(row.decimal(), Some(Decimal::ZERO));
        }
    }

    #[test]
    fn shared_pool_rations_groups_in_turn() {
        let registry = ParameterRegistry::standard();
        let mut topology = topology(6, 3);
        topology
            .create_clusters("", 2, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let cluster = topology.clusters().first().unwrap().clone();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.4), dec!(30));
        store
            .set(ctx.key(Owner::Cluster(cluster.id), ctx.params.resource_level), Value::Decimal(dec!(30)))
            .unwrap();
        let first = topology.group(*cluster.groups.first().unwrap()).unwrap();
        let second = topology.group(*cluster.groups.last().unwrap()).unwrap();
        decide(&mut store, &ctx, first, &[dec!(3), dec!(3), dec!(4)]);
        decide(&mut store, &ctx, second, &[dec!(10), dec!(10), dec!(10)]);

        let outcome = settle_cluster(&mut store, &ctx, &topology, &cluster).unwrap();
        let harvests: Vec<Decimal> = outcome.group_harvests.iter().map(|(_, h)| *h).collect();
        assert_eq!(harvests, vec![dec!(10), dec!(20)]);
        assert_eq!(outcome.starting_level, dec!(30));
        assert_eq!(outcome.resource_level, Decimal::ZERO);
        let total: Decimal = group_decisions(&store, &ctx, second).iter().map(|(_, d)| *d).sum();
        assert!(total <= dec!(20));
    }

    #[test]
    fn participant_dies_when_storage_runs_out() {
        let registry = ParameterRegistry::standard();
        let topology = topology(2, 2);
        let group = topology.groups().first().unwrap();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.4), dec!(100));
        decide(&mut store, &ctx, group, &[dec!(8), dec!(2)]);

        let summary = settle_participants(&mut store, &ctx, &group.members).unwrap();
        assert_eq!(summary, ParticipantSettlement { alive: 1, died: 1 });

        let (rich, poor) = (group.members.first().unwrap(), group.members.last().unwrap());
        let storage = |m: &Membership| {
            decimal_or_zero(&store, &ctx.key(Owner::Participant(m.id), ctx.params.storage))
        };
        assert_eq!(storage(rich), dec!(3));
        assert_eq!(storage(poor), Decimal::ZERO);
        let next_status = ctx
            .key(Owner::Participant(poor.id), ctx.params.player_status)
            .in_round(ctx.next_round.unwrap());
        assert_eq!(store.get(&next_status).unwrap().value, Value::Bool(false));
    }

    #[test]
    fn normalize_fills_missing_and_collapses_duplicates() {
        let registry = ParameterRegistry::standard();
        let topology = topology(2, 2);
        let group = topology.groups().first().unwrap();
        let mut store = DataStore::new();
        let ctx = context(registry.simulation(), dec!(0.4), dec!(100));
        let first = group.members.first().unwrap();
        for amount in [dec!(4), dec!(6)] {
            let key = ctx.decision_key(first.id);
            store.import(
                DataValue::new(key.owner, key.round, key.parameter, Value::Decimal(amount)),
                true,
            );
        }

        assert_eq!(normalize_decisions(&mut store, &ctx, &group.members).unwrap(), 2);
        let decisions = group_decisions(&store, &ctx, group);
        assert_eq!(decisions.first().map(|d| d.1), Some(dec!(6)));
        assert_eq!(decisions.last().map(|d| d.1), Some(Decimal::ZERO));
        for membership in &group.members {
            assert!(store.get_exactly_one(&ctx.decision_key(membership.id)).is_ok());
        }
    }
}
