//! The versioned data store: every simulation fact as a keyed history.
//!
//! A [`DataStore`] maps `(owner, round, parameter)` to a
//! [`ValueHistory`] of [`DataValue`] rows. There is no separate "current
//! state" table: the current value of a key is its active row.
//!
//! # Invariant
//!
//! At most one active row per key. The store's own write paths maintain it;
//! [`DataStore::import`] can break it when loading external rows, and
//! [`DataStore::normalize`] repairs it by keeping the most recent row.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use commons_types::{DataValue, Owner, ParameterId, RoundDataId, Value};

use crate::StoreError;
use crate::history::{ValueHistory, Version};

/// Address of one history in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueKey {
    /// Entity the value belongs to.
    pub owner: Owner,
    /// Round instance.
    pub round: RoundDataId,
    /// Parameter slot.
    pub parameter: ParameterId,
}

impl ValueKey {
    /// Build a key.
    pub const fn new(owner: Owner, round: RoundDataId, parameter: ParameterId) -> Self {
        Self {
            owner,
            round,
            parameter,
        }
    }

    /// The same owner and parameter in another round.
    pub const fn in_round(self, round: RoundDataId) -> Self {
        Self { round, ..self }
    }
}

impl core::fmt::Display for ValueKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "({}, round {}, parameter {})",
            self.owner, self.round, self.parameter
        )
    }
}

/// In-memory versioned store for one experiment.
///
/// `Clone` is cheap enough to serve as a checkpoint around a lifecycle
/// transition.
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    entries: BTreeMap<ValueKey, ValueHistory<DataValue>>,
}

impl DataStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Number of keys with at least one row.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The active row for `key`, tolerating duplicates.
    pub fn get(&self, key: &ValueKey) -> Option<&DataValue> {
        self.entries.get(key).and_then(ValueHistory::current)
    }

    /// The single active row for `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when there is no active row and
    /// [`StoreError::Conflict`] when there is more than one.
    pub fn get_exactly_one(&self, key: &ValueKey) -> Result<&DataValue, StoreError> {
        let history = self
            .entries
            .get(key)
            .ok_or(StoreError::NotFound { key: *key })?;
        history
            .current_strict()
            .map_err(|source| StoreError::Conflict { key: *key, source })?
            .ok_or(StoreError::NotFound { key: *key })
    }

    /// The active row for `key`, creating one from `default` if none exists.
    ///
    /// Duplicate active rows found here are repaired by keeping the most
    /// recent one.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when there is no active row and no default.
    pub fn get_or_create(
        &mut self,
        key: ValueKey,
        default: Option<Value>,
    ) -> Result<&DataValue, StoreError> {
        if default.is_none() && self.get(&key).is_none() {
            return Err(StoreError::NotFound { key });
        }
        let history = self.entries.entry(key).or_default();
        let repaired = history.normalize();
        if repaired > 0 {
            warn!(%key, repaired, "duplicate active values repaired on read");
        }
        if history.current().is_none() {
            let Some(value) = default else {
                return Err(StoreError::NotFound { key });
            };
            history.push(DataValue::new(key.owner, key.round, key.parameter, value), true);
        }
        history.current().ok_or(StoreError::NotFound { key })
    }

    /// Create or update the active row for `key` in place.
    pub fn set(&mut self, key: ValueKey, value: Value) -> Result<&DataValue, StoreError> {
        let history = self.entries.entry(key).or_default();
        if let Some(row) = history.current_mut() {
            row.value = value;
        } else {
            history.push(DataValue::new(key.owner, key.round, key.parameter, value), true);
        }
        history.current().ok_or(StoreError::NotFound { key })
    }

    /// Mark the active row for `key` as submitted (or not).
    pub fn set_submitted(&mut self, key: &ValueKey, submitted: bool) -> Result<(), StoreError> {
        let row = self
            .entries
            .get_mut(key)
            .and_then(ValueHistory::current_mut)
            .ok_or(StoreError::NotFound { key: *key })?;
        row.submitted = submitted;
        Ok(())
    }

    /// Deactivate the active row(s) for `key` and insert a fresh one.
    pub fn supersede(
        &mut self,
        key: ValueKey,
        value: Value,
        submitted: bool,
    ) -> Result<&DataValue, StoreError> {
        let mut row = DataValue::new(key.owner, key.round, key.parameter, value);
        row.submitted = submitted;
        let history = self.entries.entry(key).or_default();
        history.supersede(row);
        debug!(%key, versions = history.len(), "value superseded");
        history.current().ok_or(StoreError::NotFound { key })
    }

    /// Copy the active row for `key` into `next_round` with a new identity.
    ///
    /// The source row is not touched. Any active row already present in the
    /// next round is superseded by the copy.
    pub fn carry_forward(
        &mut self,
        key: &ValueKey,
        next_round: RoundDataId,
    ) -> Result<&DataValue, StoreError> {
        let carried = self
            .get(key)
            .ok_or(StoreError::NotFound { key: *key })?
            .carried_to(next_round);
        let next_key = key.in_round(next_round);
        let history = self.entries.entry(next_key).or_default();
        history.supersede(carried);
        history
            .current()
            .ok_or(StoreError::NotFound { key: next_key })
    }

    /// Deactivate every active row for `key`, returning how many changed.
    pub fn deactivate(&mut self, key: &ValueKey) -> usize {
        self.entries
            .get_mut(key)
            .map_or(0, ValueHistory::deactivate_all)
    }

    /// Load a row exactly as given, e.g. from an external persistence layer.
    ///
    /// Rows are appended in call order, which defines recency.
    pub fn import(&mut self, row: DataValue, active: bool) {
        let key = ValueKey::new(row.owner, row.round, row.parameter);
        self.entries.entry(key).or_default().push(row, active);
    }

    /// Keep only the most recent active row for `key` active.
    pub fn normalize(&mut self, key: &ValueKey) -> usize {
        let repaired = self.entries.get_mut(key).map_or(0, ValueHistory::normalize);
        if repaired > 0 {
            warn!(%key, repaired, "duplicate active values repaired");
        }
        repaired
    }

    /// Every version recorded for `key`, oldest first.
    pub fn history(&self, key: &ValueKey) -> &[Version<DataValue>] {
        self.entries
            .get(key)
            .map(ValueHistory::versions)
            .unwrap_or_default()
    }

    /// Active rows for `parameter` across all owners in `round`.
    pub fn active_in_round(
        &self,
        round: RoundDataId,
        parameter: ParameterId,
    ) -> impl Iterator<Item = &DataValue> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.round == round && key.parameter == parameter)
            .filter_map(|(_, history)| history.current())
    }

    /// Active rows for `parameter` owned by `owner` in any round.
    pub fn active_for_owner(
        &self,
        owner: Owner,
        parameter: ParameterId,
    ) -> impl Iterator<Item = &DataValue> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.owner == owner && key.parameter == parameter)
            .filter_map(|(_, history)| history.current())
    }

    /// Drop every row belonging to `round`, returning how many keys went.
    pub fn remove_round(&mut self, round: RoundDataId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.round != round);
        before.saturating_sub(self.entries.len())
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        let keys = self.entries.len();
        self.entries.clear();
        debug!(keys, "data store cleared");
    }
}
