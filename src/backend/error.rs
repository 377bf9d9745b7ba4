//! Error types for backend configuration and launching

use std::path::PathBuf;
use std::time::Duration;

use crate::io::ProcessError;
use crate::io::transport::StreamTransportError;
use crate::lsp::error::SessionError;

/// Errors starting or stopping a backend session
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Handshake, request or template errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Spawning or stopping the backend process
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Connecting to a backend socket
    #[error("Transport error: {0}")]
    Transport(#[from] StreamTransportError),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed JSON supplied by the caller
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No built-in profile with this name
    #[error("Unknown backend '{name}' (built-in: {known})")]
    UnknownBackend { name: String, known: String },

    /// A workspace file could not be read
    #[error("Cannot read {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line number past the end of a file
    #[error("{path} has no line {line}")]
    LineOutOfRange { path: PathBuf, line: u32 },

    /// Workspace root does not exist or is not a directory
    #[error("Invalid workspace root: {path}")]
    InvalidWorkspaceRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing or blank configuration field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Invalid path format or value
    #[error("Invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    /// Invalid timeout value
    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },
}

impl ConfigError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }
}
