//! Error types for ledger operations.

use crate::AccountId;
use std::fmt;
use thiserror::Error;

/// Entity kinds addressed by plain reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Account,
    Posting,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Account => f.write_str("account"),
            Entity::Posting => f.write_str("posting"),
        }
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Plain read found no row.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: i64 },

    /// Posting target does not exist. The enclosing transaction was rolled back.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Another account already uses this document number.
    #[error("Duplicate document number: {0}")]
    DuplicateDocumentNumber(String),

    /// Transactional I/O error from the store.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Deadline or lock wait expired. The enclosing transaction was rolled back.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The store broke a ledger invariant.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// Posting request rejected by validation.
    #[error("Invalid posting: {message}")]
    InvalidPosting {
        message: String,
        field: Option<String>,
    },

    /// Operation-type code not present in the catalog.
    #[error("Unknown posting type: {0}")]
    UnknownPostingType(i32),
}

impl LedgerError {
    /// Shorthand for an account read miss.
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound {
            entity: Entity::Account,
            id: id.get(),
        }
    }

    /// Shorthand for a posting read miss.
    pub fn posting_not_found(id: crate::PostingId) -> Self {
        LedgerError::NotFound {
            entity: Entity::Posting,
            id: id.get(),
        }
    }

    /// Shorthand for a validation failure on a named field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        LedgerError::InvalidPosting {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Check if the caller may retry the operation unchanged.
    ///
    /// Retrying is safe for these because a failed call never leaves
    /// partial state behind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout(_) | LedgerError::StorageFailure(_)
        )
    }

    /// Check if this is any kind of missing-row error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound { .. } | LedgerError::AccountNotFound(_)
        )
    }

    /// Get error code for the transport layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::DuplicateDocumentNumber(_) => "DUPLICATE_DOCUMENT_NUMBER",
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            LedgerError::InvalidPosting { .. } => "INVALID_POSTING",
            LedgerError::UnknownPostingType(_) => "UNKNOWN_POSTING_TYPE",
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
