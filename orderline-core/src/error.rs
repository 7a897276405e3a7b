//! Error types for orderline operations

use crate::validation::FieldViolation;
use thiserror::Error;

/// Storage layer errors, as reported by an `OrderStore` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Order not found: {order_uid}")]
    NotFound { order_uid: String },

    #[error("Order already exists: {order_uid}")]
    Conflict { order_uid: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the order service to its callers (the serving adapter
/// and the ingestion loop).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Bad input shape or content. Never retried.
    #[error("Validation failed: {}", display_first(.violations))]
    ValidationFailed { violations: Vec<FieldViolation> },

    /// The message payload could not be decoded. Never retried with the same bytes.
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Durable store I/O or conflict.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] StorageError),

    /// No order with this id. Absence, not a fault.
    #[error("Order not found: {order_uid}")]
    NotFound { order_uid: String },
}

fn display_first(violations: &[FieldViolation]) -> String {
    match violations.first() {
        Some(first) if violations.len() > 1 => {
            format!("{} (and {} more)", first, violations.len() - 1)
        }
        Some(first) => first.to_string(),
        None => "no violations reported".to_string(),
    }
}

impl OrderError {
    pub fn not_found(order_uid: impl Into<String>) -> Self {
        Self::NotFound {
            order_uid: order_uid.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the same input may succeed on a later attempt.
    ///
    /// Only store failures that are not identity conflicts qualify; bad input
    /// stays bad.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PersistenceFailed(err) => !err.is_conflict() && !err.is_not_found(),
            _ => false,
        }
    }

    /// Short, stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation_failed",
            Self::MalformedMessage { .. } => "malformed_message",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Result type alias for order service operations.
pub type OrderResult<T> = Result<T, OrderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_conflict() {
        let err = StorageError::Conflict {
            order_uid: "A1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already exists"));
        assert!(msg.contains("A1"));
    }

    #[test]
    fn test_validation_failed_displays_first_violation() {
        let err = OrderError::ValidationFailed {
            violations: vec![
                FieldViolation::new("delivery.email", "must be a valid email address"),
                FieldViolation::new("items[0].sale", "must be between 0 and 100"),
            ],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("field delivery.email: must be a valid email address"));
        assert!(msg.contains("and 1 more"));
    }

    #[test]
    fn test_retryable_classification() {
        let io = OrderError::from(StorageError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert!(io.is_retryable());

        let conflict = OrderError::from(StorageError::Conflict {
            order_uid: "A1".to_string(),
        });
        assert!(!conflict.is_retryable());

        assert!(!OrderError::malformed("eof").is_retryable());
        assert!(!OrderError::ValidationFailed { violations: vec![] }.is_retryable());
        assert!(!OrderError::not_found("A1").is_retryable());
    }

    #[test]
    fn test_order_error_from_storage() {
        let err = OrderError::from(StorageError::TransactionFailed {
            reason: "deadlock".to_string(),
        });
        assert!(matches!(err, OrderError::PersistenceFailed(_)));
        assert_eq!(err.kind(), "persistence_failed");
    }
}
