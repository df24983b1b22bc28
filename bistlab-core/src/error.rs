//! Error taxonomy shared by every layer.
//!
//! Each crate defines its own `thiserror` enum; all of them map onto the seven
//! [`ErrorKind`]s below so callers can branch on *kind* rather than on type, and
//! so the external API layer can render a stable `{code, message}` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kind, independent of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Upstream returned empty or insufficient data and no cache fallback exists.
    DataUnavailable,
    /// Series shorter than the minimum the caller requires.
    InsufficientHistory,
    /// Bad ticker, non-positive size, nonsensical date range.
    InvalidInput,
    /// A required denominator is zero in a way the epsilon guard cannot mask.
    NumericDegeneracy,
    /// An external call exceeded its deadline.
    Timeout,
    /// Retriable upstream fault.
    Transient,
    /// Invariant violation. Never recovered.
    Internal,
}

impl ErrorKind {
    /// Short stable code used in error responses and warnings.
    pub fn code(self) -> &'static str {
        match self {
            Self::DataUnavailable => "DATA_UNAVAILABLE",
            Self::InsufficientHistory => "INSUFFICIENT_HISTORY",
            Self::InvalidInput => "INVALID_INPUT",
            Self::NumericDegeneracy => "NUMERIC_DEGENERACY",
            Self::Timeout => "TIMEOUT",
            Self::Transient => "TRANSIENT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a caller may retry or fall back to stale data.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Timeout | Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Serializable error body handed to the API collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
        }
    }
}

/// Implemented by every error enum in the workspace.
pub trait Classified: std::error::Error {
    fn kind(&self) -> ErrorKind;

    fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.kind(), self.to_string())
    }
}
