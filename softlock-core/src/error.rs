//! Error types for SOFTLOCK operations

use thiserror::Error;

/// Cache backend errors.
///
/// These are the "backend I/O failure" class: the strategy never recovers
/// from them locally and hands them back to the caller unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Backend operation {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Key {key} is not locked by this node")]
    KeyNotLocked { key: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Cache backend already destroyed")]
    Destroyed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Region {region} requested minimal puts, which the read-write strategy cannot serve")]
    MinimalPutsUnsupported { region: String },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all SOFTLOCK errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SoftlockError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for SOFTLOCK operations.
pub type SoftlockResult<T> = Result<T, SoftlockError>;

impl<T> From<std::sync::PoisonError<T>> for CacheError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CacheError::LockPoisoned
    }
}

impl<T> From<std::sync::PoisonError<T>> for SoftlockError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        SoftlockError::Cache(CacheError::LockPoisoned)
    }
}

// =============================================================================
// TESTS
// =============================================================================
