//! Ordered round sequence for one treatment.
//!
//! Sequence numbers are 1-based and kept dense: inserting or removing a
//! configuration renumbers everything after it. Progress through the
//! sequence is a [`RoundPointer`]; a repeating configuration is visited once
//! per sequence number but yields one pass per repetition.

use tracing::debug;

use commons_types::{RoundConfiguration, RoundPointer};

/// Errors raised by [`RoundRegistry`] lookups and edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No configuration at this sequence number.
    #[error("no round configuration at sequence number {sequence_number} (treatment has {len})")]
    UnknownRound {
        /// Requested sequence number.
        sequence_number: u32,
        /// Number of configurations in the treatment.
        len: usize,
    },

    /// Insert position outside `1..=len + 1`.
    #[error("cannot insert at position {position} (treatment has {len})")]
    InvalidPosition {
        /// Requested position.
        position: u32,
        /// Number of configurations in the treatment.
        len: usize,
    },

    /// The treatment holds more configurations than sequence numbers allow.
    #[error("too many round configurations")]
    TooManyRounds,
}

/// The ordered round configurations of a treatment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundRegistry {
    rounds: Vec<RoundConfiguration>,
}

impl RoundRegistry {
    /// Build a registry, assigning sequence numbers `1..=N` in list order.
    pub fn new(rounds: Vec<RoundConfiguration>) -> Result<Self, RegistryError> {
        let mut registry = Self { rounds };
        registry.renumber()?;
        Ok(registry)
    }

    fn renumber(&mut self) -> Result<(), RegistryError> {
        for (index, round) in self.rounds.iter_mut().enumerate() {
            round.sequence_number = u32::try_from(index)
                .ok()
                .and_then(|i| i.checked_add(1))
                .ok_or(RegistryError::TooManyRounds)?;
        }
        Ok(())
    }

    /// Number of configurations.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Whether the treatment has no rounds.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Sequence number of the last configuration.
    pub fn final_sequence_number(&self) -> u32 {
        self.rounds.last().map_or(0, |r| r.sequence_number)
    }

    /// Configurations in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &RoundConfiguration> {
        self.rounds.iter()
    }

    /// The configuration at a 1-based sequence number.
    pub fn get(&self, sequence_number: u32) -> Result<&RoundConfiguration, RegistryError> {
        usize::try_from(sequence_number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| self.rounds.get(index))
            .ok_or(RegistryError::UnknownRound {
                sequence_number,
                len: self.rounds.len(),
            })
    }

    /// Insert a configuration at a 1-based position and renumber.
    pub fn insert(
        &mut self,
        position: u32,
        round: RoundConfiguration,
    ) -> Result<(), RegistryError> {
        let index = usize::try_from(position)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .filter(|i| *i <= self.rounds.len())
            .ok_or(RegistryError::InvalidPosition {
                position,
                len: self.rounds.len(),
            })?;
        self.rounds.insert(index, round);
        self.renumber()?;
        debug!(position, len = self.rounds.len(), "round configuration inserted");
        Ok(())
    }

    /// Remove the configuration at a sequence number and renumber.
    pub fn remove(&mut self, sequence_number: u32) -> Result<RoundConfiguration, RegistryError> {
        let index = usize::try_from(sequence_number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < self.rounds.len())
            .ok_or(RegistryError::UnknownRound {
                sequence_number,
                len: self.rounds.len(),
            })?;
        let removed = self.rounds.remove(index);
        self.renumber()?;
        debug!(sequence_number, len = self.rounds.len(), "round configuration removed");
        Ok(removed)
    }

    /// The pointer that follows `pointer`, if any.
    ///
    /// A repeating configuration with passes left yields its next
    /// repetition; otherwise the next sequence number at repetition 0.
    pub fn successor(&self, pointer: RoundPointer) -> Option<RoundPointer> {
        let current = self.get(pointer.sequence_number).ok()?;
        if current.is_repeating() && pointer.repetition < current.repeat {
            return Some(RoundPointer {
                sequence_number: pointer.sequence_number,
                repetition: pointer.repetition.saturating_add(1),
            });
        }
        let next = pointer.sequence_number.checked_add(1)?;
        self.get(next).ok().map(|_| RoundPointer::at(next))
    }

    /// The first pass of the configuration before `pointer`, floored at 1.
    pub fn predecessor(&self, pointer: RoundPointer) -> RoundPointer {
        RoundPointer::at(pointer.sequence_number.saturating_sub(1).max(1))
    }

    /// Whether another round follows `pointer`.
    pub fn has_next(&self, pointer: RoundPointer) -> bool {
        self.successor(pointer).is_some()
    }
}
