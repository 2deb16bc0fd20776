//! Scripted participants.
//!
//! A [`ScriptedHarvester`] stands in for the people at the keyboards: each
//! round it picks a harvest for every living participant according to the
//! configured [`HarvestPolicy`]. Random choices come from a seeded
//! [`StdRng`] so a run can be replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use commons_core::HarvestPolicy;

/// Chooses harvest amounts for scripted participants.
#[derive(Debug)]
pub struct ScriptedHarvester {
    policy: HarvestPolicy,
    rng: StdRng,
}

impl ScriptedHarvester {
    /// Create a harvester following `policy`, seeded with `seed`.
    pub fn new(policy: HarvestPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Amount to request when at most `max` may be harvested.
    ///
    /// Random requests are whole units in `0..=max`.
    pub fn choose(&mut self, max: Decimal) -> Decimal {
        let max = max.max(Decimal::ZERO);
        match self.policy {
            HarvestPolicy::Fixed { amount } => amount.clamp(Decimal::ZERO, max),
            HarvestPolicy::Greedy => max,
            HarvestPolicy::Random => {
                let ceiling = max.trunc().to_u32().unwrap_or(0);
                Decimal::from(self.rng.random_range(0..=ceiling))
            }
        }
    }
}
