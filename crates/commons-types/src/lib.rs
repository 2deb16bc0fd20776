//! Shared type definitions for the Commons experiment engine.
//!
//! This crate is the single source of truth for the types used across the
//! Commons workspace. Types with presentation value flow downstream to
//! `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Round kinds, experiment status, parameter scopes and families
//! - [`structs`] -- Round configuration, groups, clusters, data value rows
//! - [`parameters`] -- Typed parameter slots and the immutable registry
//! - [`view`] -- Read-only projections for participants' screens

pub mod enums;
pub mod ids;
pub mod parameters;
pub mod structs;
pub mod view;

// Re-export all public types at crate root for convenience.
pub use enums::{ExperimentFamily, ExperimentStatus, ParameterScope, RoundKind, ValueType};
pub use ids::{
    ClusterId, DataValueId, ExperimentId, GroupId, MembershipId, ParameterId, ParticipantId,
    RoundDataId,
};
pub use parameters::{Parameter, ParameterError, ParameterRegistry, SimulationParameters};
pub use structs::{
    DataValue, Group, GroupCluster, Membership, Owner, RoundConfiguration, RoundData, RoundFlags,
    RoundOverrides, RoundPointer, Value,
};
pub use view::{ParticipantViewModel, PlayerData, PoolStats};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for presentation types.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::ExperimentId::export_all();
        let _ = crate::ids::ParticipantId::export_all();
        let _ = crate::ids::GroupId::export_all();
        let _ = crate::ids::ClusterId::export_all();
        let _ = crate::ids::MembershipId::export_all();
        let _ = crate::ids::ParameterId::export_all();
        let _ = crate::ids::RoundDataId::export_all();
        let _ = crate::ids::DataValueId::export_all();

        // Enums
        let _ = crate::enums::RoundKind::export_all();
        let _ = crate::enums::ExperimentStatus::export_all();
        let _ = crate::enums::ParameterScope::export_all();
        let _ = crate::enums::ValueType::export_all();
        let _ = crate::enums::ExperimentFamily::export_all();

        // Structs
        let _ = crate::structs::RoundFlags::export_all();
        let _ = crate::structs::RoundOverrides::export_all();
        let _ = crate::structs::RoundConfiguration::export_all();
        let _ = crate::structs::RoundPointer::export_all();
        let _ = crate::structs::RoundData::export_all();
        let _ = crate::structs::Membership::export_all();
        let _ = crate::structs::Group::export_all();
        let _ = crate::structs::GroupCluster::export_all();
        let _ = crate::structs::Owner::export_all();
        let _ = crate::parameters::Parameter::export_all();

        // Views
        let _ = crate::view::PoolStats::export_all();
        let _ = crate::view::ParticipantViewModel::export_all();
        let _ = crate::view::PlayerData::export_all();
    }
}
