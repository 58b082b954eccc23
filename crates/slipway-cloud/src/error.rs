//! Cloud error classification.
//!
//! The deployer only distinguishes three outcomes of a cloud call:
//! the resource is missing, the request itself is invalid, or the call
//! failed in a way worth retrying. Everything else is a transient.

use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors surfaced by the capability traits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{op} failed: {message}")]
    Transient { op: String, message: String },
}

impl CloudError {
    /// A retryable failure attributed to one API operation.
    pub fn transient(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            op: op.into(),
            message: message.into(),
        }
    }
}
