//! Round lifecycle strategies, one per experiment family.

pub mod boundary_effects;
pub mod forestry;

pub use boundary_effects::BoundaryEffects;
pub use forestry::Forestry;
