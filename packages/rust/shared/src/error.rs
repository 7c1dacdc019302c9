//! Error types for nbpub.
//!
//! Library crates use [`NbPubError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nbpub operations.
#[derive(Debug, thiserror::Error)]
pub enum NbPubError {
    /// Configuration loading or resolution error, including ambiguous
    /// environment files.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the release or download API.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed notebook, YAML, JSON or API payload.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Archive read/write error (zip output, zipball input).
    #[error("archive error: {0}")]
    Archive(String),

    /// The execution engine failed on a notebook.
    #[error("failed to execute {notebook:?}: {message}")]
    Execution { notebook: PathBuf, message: String },

    /// Data validation error (no usable release, path outside a root, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NbPubError>;

impl NbPubError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Execution failure for the notebook at `notebook` (source-relative).
    pub fn execution(notebook: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Execution {
            notebook: notebook.into(),
            message: msg.into(),
        }
    }
}
