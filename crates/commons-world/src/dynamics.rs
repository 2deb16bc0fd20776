//! Pure resource arithmetic: rationing, logistic regrowth and clamping.
//!
//! Nothing in this module touches the data store. Settlement reads values,
//! calls these functions, and writes the results back.
//!
//! All quantities are [`Decimal`]. Computed shares and regrowth are truncated
//! toward zero at [`QUANTITY_SCALE`] decimal places, so rounding can only
//! leave resource in a pool, never create it.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::DynamicsError;

/// Decimal places kept for computed quantities.
pub const QUANTITY_SCALE: u32 = 4;

/// Truncate a computed quantity to [`QUANTITY_SCALE`] places.
pub fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero)
}

// ---------------------------------------------------------------------------
// Regrowth
// ---------------------------------------------------------------------------

/// Discrete logistic regrowth of a pool.
///
/// `rate * level * (1 - level / capacity)`, or zero when the pool is empty
/// or at (or above) capacity.
///
/// # Errors
///
/// [`DynamicsError::InvalidRegrowthRate`] for a rate outside `[0, 1]`, and
/// [`DynamicsError::ArithmeticOverflow`] if checked arithmetic fails.
pub fn calculate_regrowth(
    level: Decimal,
    rate: Decimal,
    capacity: Decimal,
) -> Result<Decimal, DynamicsError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(DynamicsError::InvalidRegrowthRate(rate));
    }
    if level <= Decimal::ZERO || capacity <= Decimal::ZERO || level >= capacity {
        return Ok(Decimal::ZERO);
    }
    let headroom = level
        .checked_div(capacity)
        .and_then(|ratio| Decimal::ONE.checked_sub(ratio))
        .ok_or(DynamicsError::ArithmeticOverflow)?;
    rate.checked_mul(level)
        .and_then(|v| v.checked_mul(headroom))
        .map(truncate)
        .ok_or(DynamicsError::ArithmeticOverflow)
}

/// Result of removing a harvest from a pool and regrowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    /// Level after the harvest was removed.
    pub after_harvest: Decimal,
    /// Regrowth added to the post-harvest level.
    pub regrowth: Decimal,
    /// Final level, clamped to capacity.
    pub new_level: Decimal,
}

/// Subtract `harvest`, regrow, and clamp to `capacity`.
///
/// # Errors
///
/// Propagates [`calculate_regrowth`] errors.
pub fn apply_harvest(
    level: Decimal,
    harvest: Decimal,
    rate: Decimal,
    capacity: Decimal,
) -> Result<LevelUpdate, DynamicsError> {
    let after_harvest = level
        .checked_sub(harvest)
        .ok_or(DynamicsError::ArithmeticOverflow)?
        .max(Decimal::ZERO);
    let regrowth = calculate_regrowth(after_harvest, rate, capacity)?;
    let new_level = after_harvest
        .checked_add(regrowth)
        .ok_or(DynamicsError::ArithmeticOverflow)?
        .min(capacity);
    Ok(LevelUpdate {
        after_harvest,
        regrowth,
        new_level,
    })
}

// ---------------------------------------------------------------------------
// Rationing
// ---------------------------------------------------------------------------

/// One decision's outcome after rationing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation<K> {
    /// Whose decision this is.
    pub key: K,
    /// The amount requested.
    pub requested: Decimal,
    /// The amount granted.
    pub granted: Decimal,
}

impl<K> Allocation<K> {
    /// Whether the grant differs from the request.
    pub fn is_rationed(&self) -> bool {
        self.granted != self.requested
    }
}

/// Outcome of one rationing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rationing<K> {
    /// Positive decisions in the order they were processed (ascending).
    pub allocations: Vec<Allocation<K>>,
    /// Sum of granted amounts; never exceeds the level rationed against.
    pub total: Decimal,
}

/// Water-filling rationing of `decisions` against `level`.
///
/// The fair share starts at `level / pool_size`. Positive decisions are
/// visited smallest first; one at or below the current share is granted in
/// full. One above it triggers a recomputed share of what remains divided by
/// the decisions not yet visited, and is granted the smaller of its request
/// and that share. Ties keep their input order.
///
/// `pool_size` is the number of people the pool is shared between, which for
/// a cluster is larger than the number of decisions passed in.
///
/// # Errors
///
/// [`DynamicsError::EmptyPool`] when `pool_size` is zero and there are
/// decisions to ration, [`DynamicsError::ArithmeticOverflow`] on overflow.
pub fn ration<K: Copy>(
    level: Decimal,
    pool_size: usize,
    decisions: &[(K, Decimal)],
) -> Result<Rationing<K>, DynamicsError> {
    let mut positive: Vec<(K, Decimal)> = decisions
        .iter()
        .copied()
        .filter(|(_, amount)| *amount > Decimal::ZERO)
        .collect();
    positive.sort_by_key(|(_, amount)| *amount);

    let count = positive.len();
    if count == 0 {
        return Ok(Rationing {
            allocations: Vec::new(),
            total: Decimal::ZERO,
        });
    }
    if pool_size == 0 {
        return Err(DynamicsError::EmptyPool);
    }

    let level = level.max(Decimal::ZERO);
    let mut share = level
        .checked_div(Decimal::from(pool_size.max(count)))
        .ok_or(DynamicsError::ArithmeticOverflow)?;
    let mut total = Decimal::ZERO;
    let mut allocations = Vec::with_capacity(count);

    for (visited, (key, requested)) in positive.into_iter().enumerate() {
        let granted = if requested <= share {
            requested
        } else {
            let remaining_level = level
                .checked_sub(total)
                .ok_or(DynamicsError::ArithmeticOverflow)?
                .max(Decimal::ZERO);
            let remaining_decisions = count
                .checked_sub(visited)
                .filter(|n| *n > 0)
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            share = remaining_level
                .checked_div(Decimal::from(remaining_decisions))
                .map(truncate)
                .ok_or(DynamicsError::ArithmeticOverflow)?;
            requested.min(share)
        };
        total = total
            .checked_add(granted)
            .ok_or(DynamicsError::ArithmeticOverflow)?;
        allocations.push(Allocation {
            key,
            requested,
            granted,
        });
    }

    Ok(Rationing { allocations, total })
}

// ---------------------------------------------------------------------------
// Capacity and limits
// ---------------------------------------------------------------------------

/// Capacity of one group's pool.
///
/// An explicit initial level wins; otherwise
/// `per_participant_per_round * group_size * rounds`.
///
/// # Errors
///
/// [`DynamicsError::ArithmeticOverflow`] if checked arithmetic fails.
pub fn pool_capacity(
    initial_level: Option<Decimal>,
    per_participant_per_round: Decimal,
    group_size: u32,
    rounds: u32,
) -> Result<Decimal, DynamicsError> {
    if let Some(level) = initial_level {
        return Ok(level);
    }
    per_participant_per_round
        .checked_mul(Decimal::from(group_size))
        .and_then(|v| v.checked_mul(Decimal::from(rounds)))
        .ok_or(DynamicsError::ArithmeticOverflow)
}

/// Capacity of a shared pool: per-group capacity times member groups.
///
/// # Errors
///
/// [`DynamicsError::ArithmeticOverflow`] if checked arithmetic fails.
pub fn shared_capacity(capacity: Decimal, groups: usize) -> Result<Decimal, DynamicsError> {
    capacity
        .checked_mul(Decimal::from(groups))
        .ok_or(DynamicsError::ArithmeticOverflow)
}

/// Stepped per-participant harvest limit for a forest at `level`.
pub fn forestry_max_harvest(level: Decimal) -> Decimal {
    const STEPS: [(i64, i64); 5] = [(25, 5), (20, 4), (15, 3), (10, 2), (5, 1)];
    STEPS
        .iter()
        .find(|(threshold, _)| level >= Decimal::from(*threshold))
        .map_or(Decimal::ZERO, |(_, limit)| Decimal::from(*limit))
}
