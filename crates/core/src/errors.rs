//! Core error types for the save coordination layer.
//!
//! Writer failures are not errors here: they travel as `SaveResult` values so
//! that every caller coalesced into one write observes the same settlement.
//! This module covers what can go wrong around the writes instead.

use thiserror::Error;

use crate::save::SaveError;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Save operation failed: {0}")]
    Save(#[from] SaveError),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Creates an InvalidConfigValue error for an environment key.
    pub fn invalid_config(key: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Error::InvalidConfigValue(format!("{}={:?}: {}", key, value, reason))
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
