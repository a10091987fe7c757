//! Account definitions for the ledger.

use chrono::{DateTime, Utc};
use payledger_common::AccountId;
use serde::{Deserialize, Serialize};

/// A customer account.
///
/// Accounts carry no balance; the economic position lives entirely in the
/// account's postings. Once created an account is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned identifier.
    pub id: AccountId,
    /// Externally supplied document number, unique across accounts.
    pub document_number: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Assemble an account from stored columns.
    pub fn new(id: AccountId, document_number: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            document_number: document_number.into(),
            created_at,
        }
    }
}
