//! Post-run ledger invariant checks.

use payledger_common::AccountId;
use payledger_engine::SettlementEngine;
use payledger_ledger::{AccountPosition, LedgerStore};
use tracing::error;

/// A broken ledger invariant found after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub account_id: AccountId,
    pub detail: String,
}

/// Check every account: each posting within its bounds, and the sum of
/// amounts equal to the sum of remaining balances.
pub async fn verify_accounts<S: LedgerStore>(
    engine: &SettlementEngine<S>,
    accounts: &[AccountId],
) -> anyhow::Result<Vec<Violation>> {
    let mut violations = Vec::new();

    for &account_id in accounts {
        let postings = engine.account_postings(account_id).await?;

        for posting in postings.iter().filter(|p| !p.is_within_bounds()) {
            violations.push(Violation {
                account_id,
                detail: format!(
                    "posting {} ({}) amount {} has remaining balance {}",
                    posting.id, posting.posting_type, posting.amount, posting.remaining_balance
                ),
            });
        }

        let position = AccountPosition::from_postings(account_id, &postings);
        if !position.is_conserved() {
            violations.push(Violation {
                account_id,
                detail: format!(
                    "total posted {} differs from net remaining {}",
                    position.total_posted,
                    position.net()
                ),
            });
        }
    }

    for violation in &violations {
        error!(account_id = %violation.account_id, detail = %violation.detail, "Invariant violated");
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use payledger_common::PostingType;
    use payledger_engine::EngineConfig;
    use payledger_ledger::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_clean_ledger_has_no_violations() {
        let engine = SettlementEngine::new(InMemoryLedgerStore::new(), EngineConfig::default());
        let account = engine.create_account("verify-1").await.unwrap();
        engine
            .post_transaction(account.id, PostingType::NormalPurchase, dec!(-30))
            .await
            .unwrap();
        engine
            .post_transaction(account.id, PostingType::CreditVoucher, dec!(45))
            .await
            .unwrap();

        let violations = verify_accounts(&engine, &[account.id]).await.unwrap();
        assert!(violations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_is_an_error() {
        let engine = SettlementEngine::new(InMemoryLedgerStore::new(), EngineConfig::default());
        assert!(verify_accounts(&engine, &[AccountId::new(404)]).await.is_err());
    }
}
