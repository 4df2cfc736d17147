//! Error types for the decision client.
//!
//! "Not ready" and "no identity" are deliberately absent: queries degrade to
//! safe defaults in those cases instead of failing.

use resource_framework::FrameworkError;
use thiserror::Error;

/// Failures while obtaining a datafile.
#[derive(Debug, Error)]
pub enum DatafileError {
    /// The request never produced a response.
    #[error("Datafile request failed: {0}")]
    Fetch(String),

    /// The server answered with an error status.
    #[error("Datafile request returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not valid JSON.
    #[error("Datafile is not valid JSON: {body}")]
    Parse { body: String },

    /// The datafile cache could not be read or written.
    #[error("Datafile cache error: {0}")]
    Storage(#[from] StorageError),
}

impl From<DatafileError> for FrameworkError {
    fn from(e: DatafileError) -> Self {
        FrameworkError::load_failed(e)
    }
}

/// Failures of a [`KeyValueStore`](crate::datafile::KeyValueStore).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors raised while building a [`DecisionClient`](crate::DecisionClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// None of datafile, datafile URL or SDK key was supplied.
    #[error("A datafile, datafile URL or SDK key is required")]
    ConfigurationMissing,

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// The default HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
