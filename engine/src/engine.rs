//! Settlement engine.
//!
//! Every posting runs as exactly one store transaction:
//!
//! 1. lock the account (fails with `AccountNotFound` when absent)
//! 2. for a credit, read the outstanding debits and plan FIFO settlement
//! 3. write the debit updates and insert the new posting
//! 4. commit
//!
//! Any failure, including an expired deadline, rolls the whole transaction
//! back. The deadline bounds steps 1 to 3 only; once the work is staged the
//! commit runs to completion, so a posting is never reported as timed out
//! after it became durable. The account lock serializes postings to one account; postings to
//! different accounts run in parallel.

use std::sync::Arc;
use std::time::Duration;

use payledger_common::{
    has_valid_scale, to_stored_scale, AccountId, LedgerError, LedgerResult, PostingId,
    PostingType, PostingTypeCatalog,
};
use payledger_ledger::{Account, AccountPosition, LedgerStore, LedgerTx, NewPosting, Posting};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::fifo::{plan_settlement, SettlementPlan};
use crate::metrics::{EngineMetrics, SharedMetrics};

/// Identifiers of a committed posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingResult {
    pub posting_id: PostingId,
    pub account_id: AccountId,
}

/// The settlement engine.
pub struct SettlementEngine<S> {
    store: S,
    config: EngineConfig,
    metrics: SharedMetrics,
}

impl<S: LedgerStore> SettlementEngine<S> {
    /// Create an engine over `store`.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Operation-type catalog.
    pub fn catalog(&self) -> &PostingTypeCatalog {
        &self.config.catalog
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Create an account. The document number must be non-blank and unused.
    #[instrument(skip(self))]
    pub async fn create_account(&self, document_number: &str) -> LedgerResult<Account> {
        if document_number.trim().is_empty() {
            return Err(LedgerError::invalid(
                "document_number",
                "document number is required",
            ));
        }

        let mut tx = self.store.begin().await?;
        let account = match tx.insert_account(document_number).await {
            Ok(account) => account,
            Err(e) => {
                rollback(tx).await;
                return Err(self.failed(e));
            }
        };
        tx.commit().await.map_err(|e| self.failed(e))?;

        self.metrics.account_created();
        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    /// Record a posting with the configured deadline.
    ///
    /// `amount` must already carry the sign of its class: negative for
    /// debit-class, positive for credit-class. A positive amount runs FIFO
    /// settlement against the oldest outstanding debits.
    pub async fn post_transaction(
        &self,
        account_id: AccountId,
        posting_type: PostingType,
        amount: Decimal,
    ) -> LedgerResult<PostingResult> {
        self.post_transaction_within(account_id, posting_type, amount, self.config.posting_deadline)
            .await
    }

    /// Record a posting, giving up with `Timeout` if the lock wait and the
    /// settlement writes take longer than `deadline`.
    ///
    /// On expiry the in-flight transaction is dropped, which rolls it back
    /// and releases the account lock. The commit itself is not subject to
    /// the deadline.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn post_transaction_within(
        &self,
        account_id: AccountId,
        posting_type: PostingType,
        amount: Decimal,
        deadline: Duration,
    ) -> LedgerResult<PostingResult> {
        let staged = match tokio::time::timeout(
            deadline,
            self.stage_posting(account_id, posting_type, amount),
        )
        .await
        {
            Ok(staged) => staged,
            Err(_) => Err(LedgerError::Timeout(format!(
                "posting to account {} exceeded {:?}",
                account_id, deadline
            ))),
        };

        let outcome = match staged {
            Ok((tx, posting, plan)) => tx.commit().await.map(|()| (posting, plan)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((posting, plan)) => {
                self.metrics.posting_recorded(
                    posting.posting_type.is_credit(),
                    plan.debits_touched(),
                    plan.debits_settled(),
                );
                info!(
                    posting_id = %posting.id,
                    amount = %posting.amount,
                    remaining_balance = %posting.remaining_balance,
                    debits_touched = plan.debits_touched(),
                    debits_settled = plan.debits_settled(),
                    "Posting recorded"
                );
                Ok(PostingResult {
                    posting_id: posting.id,
                    account_id: posting.account_id,
                })
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    /// Record a posting identified by an external operation-type code and
    /// an unsigned magnitude.
    ///
    /// The code is resolved through the catalog, the magnitude must be
    /// positive with at most two decimal places, and the sign is derived
    /// from the posting class.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn post_operation(
        &self,
        account_id: AccountId,
        operation_type_id: i32,
        magnitude: Decimal,
    ) -> LedgerResult<PostingResult> {
        let posting_type = self
            .config
            .catalog
            .resolve(operation_type_id)
            .ok_or(LedgerError::UnknownPostingType(operation_type_id))?;

        if magnitude <= Decimal::ZERO {
            return Err(LedgerError::invalid("amount", "amount must be greater than zero"));
        }
        if !has_valid_scale(magnitude) {
            return Err(LedgerError::invalid(
                "amount",
                "amount must have at most 2 decimal places",
            ));
        }

        let amount = posting_type.signed(to_stored_scale(magnitude));
        self.post_transaction(account_id, posting_type, amount).await
    }

    /// Read a committed posting.
    pub async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        self.store.get_posting(posting_id).await
    }

    /// Read a committed account.
    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.store.get_account(account_id).await
    }

    /// Committed postings of an account in settlement order.
    pub async fn account_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        self.store.list_postings(account_id).await
    }

    /// Current position of an account.
    pub async fn account_position(&self, account_id: AccountId) -> LedgerResult<AccountPosition> {
        let postings = self.store.list_postings(account_id).await?;
        Ok(AccountPosition::from_postings(account_id, &postings))
    }

    /// Delete an account and its postings. Waits for in-flight postings to
    /// the same account.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn delete_account(&self, account_id: AccountId) -> LedgerResult<()> {
        self.store
            .delete_account(account_id)
            .await
            .map_err(|e| self.failed(e))?;
        info!("Account deleted");
        Ok(())
    }

    /// Begin a transaction and run the posting inside it, leaving the
    /// commit to the caller.
    async fn stage_posting(
        &self,
        account_id: AccountId,
        posting_type: PostingType,
        amount: Decimal,
    ) -> LedgerResult<(Box<dyn LedgerTx>, Posting, SettlementPlan)> {
        let mut tx = self.store.begin().await?;

        match settle(tx.as_mut(), account_id, posting_type, amount).await {
            Ok((posting, plan)) => Ok((tx, posting, plan)),
            Err(e) => {
                rollback(tx).await;
                Err(e)
            }
        }
    }

    fn failed(&self, err: LedgerError) -> LedgerError {
        match &err {
            LedgerError::Timeout(_) => {
                self.metrics.timeout();
                warn!(error = %err, "Operation timed out");
            }
            LedgerError::InvariantViolation(_) | LedgerError::StorageFailure(_) => {
                self.metrics.failure();
                error!(error = %err, code = err.error_code(), "Operation failed");
            }
            _ => {
                self.metrics.failure();
                warn!(error = %err, code = err.error_code(), "Operation rejected");
            }
        }
        err
    }
}

/// Lock, settle and insert inside `tx`. Does not commit.
async fn settle<T: LedgerTx + ?Sized>(
    tx: &mut T,
    account_id: AccountId,
    posting_type: PostingType,
    amount: Decimal,
) -> LedgerResult<(Posting, SettlementPlan)> {
    let lock = tx.lock_account(account_id).await?;

    let plan = if amount > Decimal::ZERO {
        let debits = tx.select_outstanding_debits(&lock).await?;
        plan_settlement(amount, &debits)?
    } else {
        SettlementPlan {
            updates: Vec::new(),
            leftover: amount,
        }
    };

    for update in &plan.updates {
        tx.update_posting_balance(&lock, update.posting_id, update.remaining_balance)
            .await?;
    }

    let posting = tx
        .insert_posting(
            &lock,
            NewPosting {
                posting_type,
                amount,
                remaining_balance: plan.leftover,
            },
        )
        .await?;

    Ok((posting, plan))
}

async fn rollback(tx: Box<dyn LedgerTx>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
