//! Append-only versioned data store for the Commons experiment engine.
//!
//! Every read and write of simulation state goes through this crate:
//! resource levels, harvest decisions, regrowth, storage balances and
//! alive status are all rows keyed by `(owner, round, parameter)`.
//!
//! # Modules
//!
//! - [`history`] -- [`ValueHistory`]: ordered versions with one current
//! - [`store`] -- [`DataStore`]: keyed histories with get-or-create,
//!   supersede and carry-forward

pub mod history;
pub mod store;

pub use history::{HistoryError, ValueHistory, Version};
pub use store::{DataStore, ValueKey};

/// Errors raised by [`DataStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No active row exists and none could be created.
    #[error("no active value for {key}")]
    NotFound {
        /// The key that was read.
        key: ValueKey,
    },

    /// A read expecting exactly one active row found several.
    #[error("conflicting active values for {key}: {source}")]
    Conflict {
        /// The key that was read.
        key: ValueKey,
        /// The underlying history error.
        source: HistoryError,
    },
}
