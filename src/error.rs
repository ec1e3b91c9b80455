//! Error types for yourip.

use std::path::PathBuf;

use thiserror::Error;

use crate::table::Family;

/// Error type for yourip operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Query input that is not an IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Invalid country code
    #[error("invalid country code: {0}")]
    InvalidCountryCode(String),

    /// Downloading one country/family block list failed.
    ///
    /// Aborts the whole refresh cycle; the published table stays in place.
    #[error("failed to fetch {family} ranges for {country}: {reason}")]
    Fetch {
        country: String,
        family: Family,
        reason: String,
    },

    /// Refresh cycle interrupted by shutdown
    #[error("refresh cancelled")]
    Cancelled,

    /// Snapshot could not be written or read
    #[error("snapshot {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn fetch(country: &str, family: Family, reason: impl ToString) -> Self {
        Error::Fetch {
            country: country.to_string(),
            family,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for yourip operations.
pub type Result<T> = std::result::Result<T, Error>;
