//! Unified error types for offcache.
//!
//! Each variant renders with a stable code prefix so callers on the MCP
//! side can match on it without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the offcache worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty path).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL or asset path.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// No entry stored for the request in the current generation.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Transport-level failure: connection refused, timeout, reset.
    #[error("NETWORK_FAILED: {0}")]
    NetworkFailed(String),

    /// Response body exceeded the configured byte cap.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// A pre-cache asset could not be fetched, so the generation was not committed.
    #[error("INSTALL_FAILED: {asset}: {reason}")]
    InstallFailed { asset: String, reason: String },

    /// Lifecycle transition requested from the wrong worker state.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    /// Configuration could not be turned into a usable worker.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("serialization failed: {err}"))
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::NetworkFailed(msg) => (-32008, msg.clone()),
            Error::FetchTooLarge(msg) => (-32007, msg.clone()),
            Error::InstallFailed { .. } => (-32013, err.to_string()),
            Error::InvalidState(msg) => (-32014, msg.clone()),
            Error::Config(msg) => (-32015, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
