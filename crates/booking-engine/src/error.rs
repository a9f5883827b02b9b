//! Error types for booking-engine operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unresolved conflicts: {0}")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Stale response for request {received} (latest is {latest})")]
    StaleResponse { received: u64, latest: u64 },
}

impl BookingError {
    /// Whether the caller can reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Network(_))
    }
}

/// Failure reported by an external collaborator (availability oracle or slot store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("rejected request: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<CollaboratorError> for BookingError {
    fn from(err: CollaboratorError) -> Self {
        BookingError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_maps_to_network() {
        let err: BookingError = CollaboratorError::Unreachable("timeout".into()).into();
        assert!(matches!(err, BookingError::Network(_)));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Network error: unreachable: timeout");
    }

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!BookingError::Validation("name".into()).is_retryable());
    }
}
