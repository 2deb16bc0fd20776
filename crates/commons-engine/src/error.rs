//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and of the
//! experiment instances so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: commons_core::ConfigError,
    },

    /// A lifecycle transition failed and was rolled back.
    #[error("lifecycle error: {source}")]
    Lifecycle {
        /// The underlying lifecycle error.
        #[from]
        source: commons_core::LifecycleError,
    },

    /// An experiment instance task panicked or was cancelled.
    #[error("instance {instance} failed: {message}")]
    Task {
        /// Index of the instance.
        instance: u32,
        /// Description of the failure.
        message: String,
    },
}
