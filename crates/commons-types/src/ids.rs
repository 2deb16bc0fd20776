//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity in an experiment has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. All IDs use UUID v7
//! (time-ordered) for efficient indexing in whatever persistence layer a
//! caller puts behind the engine.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for one running experiment instance.
    ExperimentId
}

define_id! {
    /// Unique identifier for a participant (a human subject or a bot).
    ParticipantId
}

define_id! {
    /// Unique identifier for a group of participants sharing a pool.
    GroupId
}

define_id! {
    /// Unique identifier for a cluster of groups sharing one pool.
    ClusterId
}

define_id! {
    /// Unique identifier for a participant's membership in one group.
    ///
    /// Re-forming groups in a new session creates new memberships, so this is
    /// the owner of every participant-scoped data value.
    MembershipId
}

define_id! {
    /// Unique identifier for a typed parameter slot.
    ParameterId
}

define_id! {
    /// Unique identifier for one materialized round instance.
    RoundDataId
}

define_id! {
    /// Unique identifier for one row of the versioned data store.
    DataValueId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let group = GroupId::new();
        let cluster = ClusterId::new();
        assert_ne!(group.into_inner(), Uuid::nil());
        assert_ne!(cluster.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = MembershipId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
