//! Validation error type shared by the release model.

use thiserror::Error;

/// Result type alias for validation.
pub type ValidationResult = Result<(), ValidationError>;

/// A malformed or internally inconsistent release document.
///
/// Validation errors are never retried; the state machine routes them
/// straight to a clean failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{scope}: {message}")]
pub struct ValidationError {
    /// Which part of the document failed ("release", "service web", ...).
    pub scope: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationError {
    pub fn new(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            message: message.into(),
        }
    }
}
