//! Group topology and resource dynamics for the Commons experiment engine.
//!
//! This crate owns who harvests from which pool and what happens to a pool
//! when a round ends.
//!
//! # Modules
//!
//! - [`topology`] -- Group packing per session, clusters, related groups
//! - [`dynamics`] -- Pure arithmetic: water-filling rationing, logistic
//!   regrowth, capacity and harvest limits
//! - [`settlement`] -- Applies the dynamics to the data store for groups,
//!   clusters and participants
//! - [`error`] -- Error types

pub mod dynamics;
pub mod error;
pub mod settlement;
pub mod topology;

pub use dynamics::{
    Allocation, LevelUpdate, QUANTITY_SCALE, Rationing, apply_harvest, calculate_regrowth,
    forestry_max_harvest, pool_capacity, ration, shared_capacity,
};
pub use error::{DynamicsError, TopologyError, WorldError};
pub use settlement::{
    ClusterSettlement, GroupSettlement, ParticipantSettlement, SettlementContext,
    decimal_or_zero, freeze_participant, group_decisions, group_harvest_total,
    normalize_decisions, ration_group, settle_cluster, settle_group, settle_participants,
};
pub use topology::{AllocationRequest, Topology};
