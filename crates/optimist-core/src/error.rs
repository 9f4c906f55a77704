//! Error types for Optimist

use thiserror::Error;

use crate::TransactionId;

/// Core Optimist errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimistError {
    // Unit-of-work errors
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    // Transaction errors
    #[error("Transaction {id} failed: {reason}")]
    TransactionFailed { id: TransactionId, reason: String },

    #[error("Workflow contract violation: {0}")]
    ContractViolation(String),

    // Ambient errors
    #[error("No async runtime: {0}")]
    NoRuntime(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OptimistError {
    /// Wrap any displayable failure from a unit of work
    pub fn task(err: impl std::fmt::Display) -> Self {
        OptimistError::TaskFailed(err.to_string())
    }

    /// Transaction this error belongs to, if any
    pub fn transaction(&self) -> Option<TransactionId> {
        match self {
            OptimistError::TransactionFailed { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Result type for Optimist operations
pub type OptimistResult<T> = Result<T, OptimistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OptimistError::TransactionFailed {
            id: TransactionId::new(3),
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Transaction txn-3 failed: boom");
        assert_eq!(err.transaction(), Some(TransactionId::new(3)));
    }

    #[test]
    fn test_task_error_from_display() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(
            OptimistError::task(io),
            OptimistError::TaskFailed("disk gone".to_string())
        );
    }
}
