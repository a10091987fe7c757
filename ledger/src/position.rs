//! Derived account position.

use payledger_common::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::posting::Posting;

/// Economic position of an account, folded from its postings.
///
/// Nothing here is stored; accounts carry no balance column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub account_id: AccountId,
    /// Sum of unsettled debit remainders, as a non-negative number.
    pub outstanding_debt: Decimal,
    /// Sum of unconsumed credit remainders.
    pub available_credit: Decimal,
    /// Number of debits with a non-zero remaining balance.
    pub open_debits: usize,
    /// Signed sum of every posting amount.
    pub total_posted: Decimal,
}

impl AccountPosition {
    /// Fold a set of postings belonging to `account_id`.
    pub fn from_postings(account_id: AccountId, postings: &[Posting]) -> Self {
        let mut position = Self {
            account_id,
            outstanding_debt: Decimal::ZERO,
            available_credit: Decimal::ZERO,
            open_debits: 0,
            total_posted: Decimal::ZERO,
        };

        for posting in postings.iter().filter(|p| p.account_id == account_id) {
            position.total_posted += posting.amount;
            if posting.is_outstanding() {
                position.outstanding_debt -= posting.remaining_balance;
                position.open_debits += 1;
            } else if posting.remaining_balance > Decimal::ZERO {
                position.available_credit += posting.remaining_balance;
            }
        }
        position
    }

    /// Net balance: available credit minus outstanding debt.
    pub fn net(&self) -> Decimal {
        self.available_credit - self.outstanding_debt
    }

    /// Settlement only moves value between debits and credits, so the sum of
    /// amounts always equals the sum of remaining balances.
    pub fn is_conserved(&self) -> bool {
        self.total_posted == self.net()
    }
}
