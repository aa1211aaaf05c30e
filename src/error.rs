//! Error types for the tickler engine.

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Delivery error: {0}")]
    Send(#[from] SendError),

    #[error("Classifier error: {0}")]
    Classify(#[from] ClassifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Durable store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("All storage paths failed for dataset {dataset}")]
    AllPathsFailed { dataset: String },

    #[error("Serialization failed for dataset {dataset}: {reason}")]
    Serialization { dataset: String, reason: String },

    #[error("Record {id} is missing mandatory identity fields: {reason}")]
    InvalidRecord { id: String, reason: String },
}

/// Registry operation errors — the caller-facing taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("No record with id {id}")]
    NotFound { id: String },

    #[error("Per-owner limit of {max} records reached")]
    QuotaExceeded { max: usize },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Delivery-channel errors, as reported by a [`crate::delivery::Sender`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Retryable failure; the item is left unfired for the next poll cycle.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Permanent quota/block condition; pauses all deliveries for a cooldown.
    #[error("Delivery channel blocked: {0}")]
    Blocked(String),
}

/// Intent-classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Could not derive a request from input: {0}")]
    Unparseable(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
