//! FIFO settlement planning.
//!
//! Pure computation: given a credit and the account's outstanding debits in
//! settlement order, decide the new remaining balance of every debit the
//! credit reaches and what is left of the credit. The engine applies the
//! plan inside the posting transaction.

use payledger_common::{LedgerError, LedgerResult, PostingId};
use payledger_ledger::Posting;
use rust_decimal::Decimal;

/// New remaining balance for one debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitUpdate {
    pub posting_id: PostingId,
    /// Remaining balance before settlement (negative).
    pub previous_balance: Decimal,
    /// Remaining balance after settlement, in `[previous_balance, 0]`.
    pub remaining_balance: Decimal,
}

impl DebitUpdate {
    /// Credit absorbed by this debit. Always positive.
    pub fn consumed(&self) -> Decimal {
        self.remaining_balance - self.previous_balance
    }

    /// Check if this update fully resolves the debit.
    pub fn settles(&self) -> bool {
        self.remaining_balance.is_zero()
    }
}

/// Outcome of applying one credit to a list of outstanding debits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettlementPlan {
    /// Updates in settlement order. Only the last one may leave its debit
    /// outstanding.
    pub updates: Vec<DebitUpdate>,
    /// Part of the credit not consumed; becomes the new posting's
    /// remaining balance.
    pub leftover: Decimal,
}

impl SettlementPlan {
    /// Number of debits whose balance changes.
    pub fn debits_touched(&self) -> usize {
        self.updates.len()
    }

    /// Number of debits brought to exactly zero.
    pub fn debits_settled(&self) -> usize {
        self.updates.iter().filter(|u| u.settles()).count()
    }

    /// Total credit absorbed by debits.
    pub fn consumed(&self) -> Decimal {
        self.updates.iter().map(DebitUpdate::consumed).sum()
    }
}

/// Plan the settlement of `credit` against `debits`, oldest first.
///
/// `debits` must be outstanding (`remaining_balance < 0`) and already in
/// settlement order. A debit that is not outstanding means the store broke
/// its contract and yields `InvariantViolation`. A non-positive credit
/// settles nothing.
pub fn plan_settlement(credit: Decimal, debits: &[Posting]) -> LedgerResult<SettlementPlan> {
    if let Some(bad) = debits.iter().find(|d| !d.is_outstanding()) {
        return Err(LedgerError::InvariantViolation(format!(
            "posting {} selected as outstanding with remaining balance {}",
            bad.id, bad.remaining_balance
        )));
    }

    let mut remaining = credit.max(Decimal::ZERO);
    let mut updates = Vec::new();

    for debit in debits {
        if remaining.is_zero() {
            break;
        }
        let new_balance = (debit.remaining_balance + remaining).min(Decimal::ZERO);
        let consumed = new_balance - debit.remaining_balance;
        updates.push(DebitUpdate {
            posting_id: debit.id,
            previous_balance: debit.remaining_balance,
            remaining_balance: new_balance,
        });
        remaining -= consumed;
    }

    Ok(SettlementPlan {
        updates,
        leftover: remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use payledger_common::{AccountId, PostingType};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn debit(id: i64, remaining: Decimal) -> Posting {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Posting {
            id: PostingId::new(id),
            account_id: AccountId::new(1),
            posting_type: PostingType::NormalPurchase,
            amount: remaining,
            remaining_balance: remaining,
            event_time: base + Duration::seconds(id),
        }
    }

    #[test]
    fn test_partial_settlement_leaves_later_debits() {
        let debits = vec![debit(1, dec!(-50)), debit(2, dec!(-30))];
        let plan = plan_settlement(dec!(40), &debits).unwrap();

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].posting_id, PostingId::new(1));
        assert_eq!(plan.updates[0].remaining_balance, dec!(-10));
        assert_eq!(plan.leftover, dec!(0));
        assert_eq!(plan.debits_settled(), 0);
    }

    #[test]
    fn test_exact_settlement() {
        let plan = plan_settlement(dec!(50), &[debit(1, dec!(-50))]).unwrap();
        assert_eq!(plan.updates[0].remaining_balance, dec!(0));
        assert!(plan.updates[0].settles());
        assert_eq!(plan.leftover, dec!(0));
    }

    #[test]
    fn test_overshoot_keeps_leftover() {
        let plan = plan_settlement(dec!(50), &[debit(1, dec!(-20))]).unwrap();
        assert_eq!(plan.updates[0].remaining_balance, dec!(0));
        assert_eq!(plan.leftover, dec!(30));
    }

    #[test]
    fn test_credit_spans_several_debits() {
        let debits = vec![debit(1, dec!(-50.0)), debit(2, dec!(-23.5)), debit(3, dec!(-18.7))];
        let plan = plan_settlement(dec!(60.0), &debits).unwrap();

        assert_eq!(plan.debits_touched(), 2);
        assert_eq!(plan.debits_settled(), 1);
        assert_eq!(plan.updates[1].remaining_balance, dec!(-13.5));
        assert_eq!(plan.consumed(), dec!(60.0));
    }

    #[test]
    fn test_no_debits() {
        let plan = plan_settlement(dec!(25), &[]).unwrap();
        assert!(plan.updates.is_empty());
        assert_eq!(plan.leftover, dec!(25));
    }

    #[test]
    fn test_non_outstanding_debit_is_invariant_violation() {
        let mut resolved = debit(2, dec!(-10));
        resolved.remaining_balance = dec!(0);
        let err = plan_settlement(dec!(5), &[debit(1, dec!(-10)), resolved]).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    fn cents() -> impl Strategy<Value = Decimal> {
        (1i64..1_000_000i64).prop_map(|c| Decimal::new(c, 2))
    }

    proptest! {
        #[test]
        fn prop_credit_is_conserved(credit in cents(), amounts in prop::collection::vec(cents(), 0..12)) {
            let debits: Vec<Posting> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| debit(i as i64 + 1, -*a))
                .collect();
            let plan = plan_settlement(credit, &debits).unwrap();

            prop_assert_eq!(plan.consumed() + plan.leftover, credit);
            prop_assert!(plan.leftover >= Decimal::ZERO);
        }

        #[test]
        fn prop_updates_stay_in_bounds(credit in cents(), amounts in prop::collection::vec(cents(), 0..12)) {
            let debits: Vec<Posting> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| debit(i as i64 + 1, -*a))
                .collect();
            let plan = plan_settlement(credit, &debits).unwrap();

            for update in &plan.updates {
                prop_assert!(update.previous_balance <= update.remaining_balance);
                prop_assert!(update.remaining_balance <= Decimal::ZERO);
                prop_assert!(update.consumed() > Decimal::ZERO);
            }
        }

        #[test]
        fn prop_updates_form_fifo_prefix(credit in cents(), amounts in prop::collection::vec(cents(), 0..12)) {
            let debits: Vec<Posting> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| debit(i as i64 + 1, -*a))
                .collect();
            let plan = plan_settlement(credit, &debits).unwrap();

            for (update, debit) in plan.updates.iter().zip(&debits) {
                prop_assert_eq!(update.posting_id, debit.id);
            }
            // Every touched debit but the last is fully settled.
            if let Some((_, init)) = plan.updates.split_last() {
                prop_assert!(init.iter().all(DebitUpdate::settles));
            }
            // Leftover credit implies nothing remains outstanding.
            if plan.leftover > Decimal::ZERO {
                prop_assert_eq!(plan.debits_settled(), debits.len());
            }
        }
    }
}
