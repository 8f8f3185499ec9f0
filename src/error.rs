//! Unified error handling for the sonda crate
//!
//! This module consolidates all domain-specific errors into a single `Error`
//! enum. Domain modules define their own error types (e.g. [`SpaceError`])
//! and convert into `Error` at module boundaries.

use std::io;
use thiserror::Error;

pub use crate::space::SpaceError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network and executor transport errors
    Network,
    /// Content validation and extraction errors
    Validation,
    /// Checkpoint and result-sink persistence errors
    Persistence,
    /// Configuration errors
    Config,
    /// Index/combo mapping misuse
    Space,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the sonda crate
#[derive(Error, Debug)]
pub enum Error {
    /// Combination space index/combo mapping errors
    #[error("Combination space error: {0}")]
    Space(#[from] SpaceError),

    /// Executor lifecycle errors (start/stop/re-acquisition)
    #[error("Executor error: {0}")]
    Executor(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persistence failures that must abort the run
    #[error("Persistence error: {context}")]
    Persistence {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an executor lifecycle error
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Create a persistence error with context and source
    pub fn persistence(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Check if this error is recoverable (can be retried)
    ///
    /// Persistence and space errors are never recoverable: the former defeats
    /// the resumability guarantee, the latter is a programming error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Space(_) => false,
            Self::Executor(_) => true,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Persistence { .. } => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Space(_) => ErrorCategory::Space,
            Self::Executor(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Io(_) | Self::Persistence { .. } => ErrorCategory::Persistence,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

// Conversion from anyhow::Error at the binary boundary
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
