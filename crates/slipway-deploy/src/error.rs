//! Deploy error taxonomy.
//!
//! Every state returns one of these; the driver's retry and catch
//! routing keys off the variant, never off message text.

use thiserror::Error;

use slipway_cloud::CloudError;
use slipway_core::ValidationError;
use slipway_lock::LockError;

/// Result type alias for deploy operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors surfaced by deploy states.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    /// Malformed or inconsistent input. Routed to a clean failure
    /// without retry.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another release holds the `(project, config)` lock.
    #[error("lock already held by {0}")]
    LockExists(String),

    /// A referenced cloud resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A cloud call failed in a way worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// Operator halt or termination storm. Never retried; forces
    /// cleanup of the new resources.
    #[error("halted: {0}")]
    Halt(String),

    /// The health poll deadline passed without reaching the target.
    #[error("deploy timed out after {0} seconds")]
    Timeout(u32),
}

impl DeployError {
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

impl From<ValidationError> for DeployError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CloudError> for DeployError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::NotFound(what) => Self::NotFound(what),
            CloudError::InvalidRequest(message) => Self::Validation(message),
            CloudError::Transient { .. } => Self::Transient(err.to_string()),
        }
    }
}

impl From<LockError> for DeployError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Exists { holder } => Self::LockExists(holder),
            LockError::Store(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_errors_map_by_class() {
        let not_found: DeployError = CloudError::NotFound("sg web".to_string()).into();
        assert!(matches!(not_found, DeployError::NotFound(_)));

        let invalid: DeployError = CloudError::InvalidRequest("bad name".to_string()).into();
        assert!(matches!(invalid, DeployError::Validation(_)));

        let transient: DeployError = CloudError::transient("describe", "throttled").into();
        assert!(matches!(transient, DeployError::Transient(_)));
    }

    #[test]
    fn lock_exists_maps_to_lock_variant() {
        let err: DeployError = LockError::Exists {
            holder: "uuid-2".to_string(),
        }
        .into();
        assert!(matches!(err, DeployError::LockExists(holder) if holder == "uuid-2"));
    }

    #[test]
    fn only_halt_is_halt() {
        assert!(DeployError::Halt("storm".to_string()).is_halt());
        assert!(!DeployError::Transient("x".to_string()).is_halt());
    }
}
