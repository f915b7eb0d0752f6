//! Tessera Error - Unified Error Types
//!
//! Error handling for every Tessera operation. Categorizes errors by domain
//! (configuration, shard fan-out, aggregation, distributed transactions,
//! repositories) and provides helpers for retryability and classification.
//!
//! Key Features:
//! - Domain-specific error variants for precise error handling
//! - Nested causes for shard and participant failures
//! - Retryable error detection for caller-side retry logic
//! - Seamless integration with std::io::Error
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Tessera operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    // Topology errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Query engine errors
    #[error("shard operation failed on '{shard}': {cause}")]
    ShardQuery {
        shard: String,
        #[source]
        cause: Box<TesseraError>,
    },

    #[error("sequence contains no elements: {0}")]
    EmptySequence(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("numeric overflow: {0}")]
    Overflow(String),

    #[error("parse error: {0}")]
    Parse(String),

    // Distributed transaction errors
    #[error("failed to begin transaction on '{participant}': {cause}")]
    TransactionBegin {
        participant: String,
        #[source]
        cause: Box<TesseraError>,
    },

    #[error("failed to commit transaction on '{participant}': {cause}")]
    TransactionCommit {
        participant: String,
        #[source]
        cause: Box<TesseraError>,
    },

    #[error("failed to roll back transaction on '{participant}': {cause}")]
    TransactionRollback {
        participant: String,
        #[source]
        cause: Box<TesseraError>,
    },

    #[error("rollback failed after transaction failure: {cause}; rollback error: {rollback}")]
    RollbackAfterFailure {
        #[source]
        cause: Box<TesseraError>,
        rollback: Box<TesseraError>,
    },

    // Argument and lifecycle errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    // Repository errors
    #[error("repository error: {0}")]
    Repository(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

// =============================================================================
// Error Classification
// =============================================================================

impl TesseraError {
    /// Returns true if the operation can be safely retried by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            TesseraError::Repository(_) => true,
            TesseraError::ShardQuery { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TesseraError::InvalidArgument(_)
                | TesseraError::InvalidState(_)
                | TesseraError::Parse(_)
                | TesseraError::TypeMismatch(_)
                | TesseraError::EmptySequence(_)
                | TesseraError::ConstraintViolation(_)
        )
    }

    /// Returns true if the error comes from a bad topology registration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, TesseraError::Configuration(_))
    }

    /// Returns true if the error was raised by a distributed transaction phase.
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            TesseraError::TransactionBegin { .. }
                | TesseraError::TransactionCommit { .. }
                | TesseraError::TransactionRollback { .. }
                | TesseraError::RollbackAfterFailure { .. }
        )
    }

    /// Wrap an error as the failure of a single shard in a fan-out.
    pub fn shard(shard: impl Into<String>, cause: TesseraError) -> Self {
        TesseraError::ShardQuery {
            shard: shard.into(),
            cause: Box::new(cause),
        }
    }

    /// Innermost cause, unwrapping shard and participant wrappers.
    pub fn root_cause(&self) -> &TesseraError {
        match self {
            TesseraError::ShardQuery { cause, .. }
            | TesseraError::TransactionBegin { cause, .. }
            | TesseraError::TransactionCommit { cause, .. }
            | TesseraError::TransactionRollback { cause, .. }
            | TesseraError::RollbackAfterFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_error_display() {
        let err = TesseraError::shard("Base_UnitTest_1", TesseraError::Repository("down".into()));
        assert_eq!(
            err.to_string(),
            "shard operation failed on 'Base_UnitTest_1': repository error: down"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_root_cause() {
        let err = TesseraError::RollbackAfterFailure {
            cause: Box::new(TesseraError::TransactionCommit {
                participant: "db-2".into(),
                cause: Box::new(TesseraError::Repository("commit refused".into())),
            }),
            rollback: Box::new(TesseraError::Repository("rollback refused".into())),
        };
        assert!(err.is_transaction_error());
        assert!(matches!(err.root_cause(), TesseraError::Repository(msg) if msg == "commit refused"));
    }

    #[test]
    fn test_classification() {
        assert!(TesseraError::InvalidArgument("x".into()).is_user_error());
        assert!(TesseraError::Configuration("x".into()).is_configuration_error());
        assert!(!TesseraError::Configuration("x".into()).is_retryable());
        assert!(!TesseraError::EmptySequence("max".into()).is_retryable());
    }
}
