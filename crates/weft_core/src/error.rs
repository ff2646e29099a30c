//! Core error types for weft.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Invalid ID format
    InvalidId {
        /// Why the ID was rejected
        reason: String,
    },

    /// Invalid timestamp
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Identifier that was looked up
        id: String,
    },

    /// I/O failure while loading an input document
    Io {
        /// Underlying error message
        reason: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding { reason } => write!(f, "Invalid encoding: {}", reason),
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::InvalidTimestamp { reason } => write!(f, "Invalid timestamp: {}", reason),
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::Io { reason } => write!(f, "I/O error: {}", reason),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}
