//! Error types for analysis-host

use thiserror::Error;

use crate::status::ServerStatus;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid root: {0}")]
    InvalidRoot(String),

    /// A single-shot backend invocation completed unsuccessfully.
    ///
    /// `status` is the health state derived from this invocation's exit code,
    /// captured before any concurrent call can overwrite the channel value.
    /// The retry loop gates on it.
    #[error("Command failed (exit code {code:?}, server {status:?}): {stderr}")]
    CommandFailed {
        code: Option<i32>,
        status: ServerStatus,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;
