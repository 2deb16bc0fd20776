//! Ordered versions of one value with a single current version.
//!
//! A [`ValueHistory`] never edits a superseded version. Writing a correction
//! deactivates whatever is active and appends a new active version, so the
//! full sequence of values stays available for audit.

/// One recorded version of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version<T> {
    /// The recorded value.
    pub value: T,
    /// Whether this version is the current one.
    pub active: bool,
}

/// Errors raised by strict reads of a history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// More than one version is marked active.
    #[error("{count} active versions where at most one is allowed")]
    MultipleActive {
        /// Number of active versions found.
        count: usize,
    },
}

/// Append-only list of versions, oldest first.
///
/// Recency is insertion order: the last active version is the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHistory<T> {
    versions: Vec<Version<T>>,
}

impl<T> Default for ValueHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueHistory<T> {
    /// Create an empty history.
    pub const fn new() -> Self {
        Self {
            versions: Vec::new(),
        }
    }

    /// Create a history holding one active version.
    pub fn with_value(value: T) -> Self {
        Self {
            versions: vec![Version {
                value,
                active: true,
            }],
        }
    }

    /// Number of recorded versions, active or not.
    pub const fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether nothing has been recorded.
    pub const fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Number of versions currently marked active.
    pub fn active_count(&self) -> usize {
        self.versions.iter().filter(|v| v.active).count()
    }

    /// The most recent active version, tolerating duplicates.
    pub fn current(&self) -> Option<&T> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.active)
            .map(|v| &v.value)
    }

    /// The active version, failing if more than one is active.
    pub fn current_strict(&self) -> Result<Option<&T>, HistoryError> {
        match self.active_count() {
            0 | 1 => Ok(self.current()),
            count => Err(HistoryError::MultipleActive { count }),
        }
    }

    /// Mutable access to the most recent active version.
    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.versions
            .iter_mut()
            .rev()
            .find(|v| v.active)
            .map(|v| &mut v.value)
    }

    /// Deactivate every active version and append `value` as current.
    pub fn supersede(&mut self, value: T) {
        self.deactivate_all();
        self.push(value, true);
    }

    /// Append a version as-is, without touching existing versions.
    ///
    /// This is the only way more than one version can become active.
    pub fn push(&mut self, value: T, active: bool) {
        self.versions.push(Version { value, active });
    }

    /// Deactivate every active version, returning how many were changed.
    pub fn deactivate_all(&mut self) -> usize {
        let mut changed: usize = 0;
        for version in self.versions.iter_mut().filter(|v| v.active) {
            version.active = false;
            changed = changed.saturating_add(1);
        }
        changed
    }

    /// Keep only the most recent active version active.
    ///
    /// Returns the number of versions deactivated.
    pub fn normalize(&mut self) -> usize {
        let mut seen_current = false;
        let mut changed: usize = 0;
        for version in self.versions.iter_mut().rev().filter(|v| v.active) {
            if seen_current {
                version.active = false;
                changed = changed.saturating_add(1);
            } else {
                seen_current = true;
            }
        }
        changed
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> &[Version<T>] {
        &self.versions
    }
}
