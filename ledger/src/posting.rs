//! Posting records.

use chrono::{DateTime, Utc};
use payledger_common::{is_outstanding, AccountId, PostingId, PostingType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single ledger entry against an account.
///
/// `remaining_balance` is the only field that changes after creation, and
/// only for debit-class postings: it starts at `amount` (negative) and moves
/// toward zero as later credits settle it. For credit-class postings it is
/// the leftover credit that was not consumed at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Store-assigned identifier.
    pub id: PostingId,
    /// Owning account.
    pub account_id: AccountId,
    /// Posting kind.
    pub posting_type: PostingType,
    /// Signed amount (negative for debit-class, positive for credit-class).
    pub amount: Decimal,
    /// Unsettled part of a debit, or unconsumed part of a credit.
    pub remaining_balance: Decimal,
    /// Server-assigned insertion time. Defines settlement order.
    pub event_time: DateTime<Utc>,
}

impl Posting {
    /// Check if this debit still has an unsettled part.
    pub fn is_outstanding(&self) -> bool {
        is_outstanding(self.remaining_balance)
    }

    /// Check if this posting is fully resolved.
    pub fn is_resolved(&self) -> bool {
        self.remaining_balance.is_zero()
    }

    /// Part of the original amount that has already been settled (debits) or
    /// consumed settling older debits (credits). Always non-negative.
    pub fn settled_amount(&self) -> Decimal {
        (self.amount - self.remaining_balance).abs()
    }

    /// Check the debit bound `amount <= remaining_balance <= 0`.
    ///
    /// Credit-class postings must have `0 <= remaining_balance <= amount`.
    pub fn is_within_bounds(&self) -> bool {
        if self.posting_type.is_debit() {
            self.amount <= self.remaining_balance && self.remaining_balance <= Decimal::ZERO
        } else {
            Decimal::ZERO <= self.remaining_balance && self.remaining_balance <= self.amount
        }
    }

    /// Key defining settlement order: oldest first, ties broken by id.
    pub fn settlement_key(&self) -> (DateTime<Utc>, PostingId) {
        (self.event_time, self.id)
    }
}

/// Column values for a posting about to be inserted.
///
/// The owning account comes from the account lock; `id` and `event_time` are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosting {
    pub posting_type: PostingType,
    pub amount: Decimal,
    pub remaining_balance: Decimal,
}
