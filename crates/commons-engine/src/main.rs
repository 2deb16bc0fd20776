//! Engine binary for the Commons experiment platform.
//!
//! Loads a treatment and runs one or more independent experiment instances
//! of it, with scripted participants in place of people. Useful for
//! checking a treatment end to end and for watching the resource dynamics
//! play out in the logs.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `commons-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Build the parameter registry
//! 4. Spawn one task per experiment instance
//! 5. Wait for every instance and log its outcome

mod error;
mod harvester;
mod instance;
mod summary;

use std::path::Path;
use std::sync::Arc;

use commons_core::{CommonsConfig, LoggingConfig};
use commons_types::ParameterRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

const CONFIG_PATH: &str = "commons-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging depends on it, so report afterwards.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("commons-engine starting");
    if !from_file {
        info!("Config file not found, using defaults");
    }
    info!(
        treatment = %config.treatment.name,
        family = config.treatment.family.namespace(),
        participants = config.treatment.participants,
        rounds = config.treatment.rounds.len(),
        instances = config.engine.instances,
        policy = ?config.engine.harvest_policy,
        "Configuration loaded"
    );

    // 3. Parameter registry, shared read-only by every instance.
    let parameters = Arc::new(ParameterRegistry::standard());

    // 4. Spawn instances.
    let handles: Vec<_> = (0..config.engine.instances)
        .map(|instance| {
            let task = instance::run_instance(
                instance,
                config.treatment.clone(),
                config.engine,
                Arc::clone(&parameters),
            );
            (instance, tokio::spawn(task))
        })
        .collect();
    info!(instances = handles.len(), "Experiment instances spawned");

    // 5. Collect outcomes.
    let mut failures: u32 = 0;
    for (instance, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            Err(EngineError::Task {
                instance,
                message: e.to_string(),
            })
        });
        match result {
            Ok(outcome) => info!(
                instance,
                experiment = %outcome.experiment_id,
                rounds_played = outcome.rounds_played,
                final_round = %outcome.final_round,
                alive = outcome.alive,
                participants = outcome.participants,
                "Instance finished"
            ),
            Err(e) => {
                error!(instance, error = %e, "Instance failed");
                failures = failures.saturating_add(1);
            }
        }
    }

    info!(failures, "commons-engine shutdown complete");
    Ok(())
}

/// Load configuration from `commons-config.yaml` in the working directory.
///
/// Returns the configuration and whether it came from the file.
fn load_config() -> Result<(CommonsConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((CommonsConfig::from_file(config_path)?, true))
    } else {
        Ok((CommonsConfig::default(), false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
