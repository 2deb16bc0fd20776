//! Round lifecycle and experiment facade for the Commons engine.
//!
//! This crate turns a treatment configuration into a running experiment:
//! it resolves the round sequence, starts and ends rounds, hands round
//! boundaries to the experiment family's settlement strategy, and exposes
//! the calls participants and experimenters make.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration: treatment, engine and logging
//! - [`registry`] -- Dense, renumbered round sequence and round pointers
//! - [`state`] -- Mutable experiment state and transition checkpoints
//! - [`observer`] -- `RoundLifecycleObserver` strategy trait
//! - [`families`] -- Forestry and boundary-effects strategies
//! - [`experiment`] -- Lifecycle controller with atomic transitions
//! - [`facade`] -- Decision submission, readiness and view queries
//! - [`events`] -- Round notifications for presentation subscribers
//! - [`error`] -- Error types

pub mod config;
pub mod error;
pub mod events;
pub mod experiment;
pub mod facade;
pub mod families;
pub mod observer;
pub mod registry;
pub mod state;

pub use config::{
    CommonsConfig, ConfigError, EngineConfig, HarvestPolicy, LoggingConfig, TreatmentConfig,
};
pub use error::{LifecycleError, SubmissionError};
pub use events::{NoOpListener, RoundEvent, RoundEventKind, RoundEventListener, RoundReport};
pub use experiment::Experiment;
pub use families::{BoundaryEffects, Forestry};
pub use observer::{RoundLifecycleObserver, observer_for};
pub use registry::{RegistryError, RoundRegistry};
pub use state::{Checkpoint, ExperimentSettings, ExperimentState};
