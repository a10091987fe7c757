//! Ledger store boundary.
//!
//! A [`LedgerStore`] hands out independent transactions ([`LedgerTx`]). All
//! settlement writes go through a transaction and require an [`AccountLock`],
//! which only [`LedgerTx::lock_account`] can produce. The lock lives exactly
//! as long as the transaction that granted it: commit, rollback and drop
//! all release it, so there is no separate unlock call to forget.
//!
//! Dropping a transaction without committing rolls it back.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use payledger_common::{AccountId, LedgerError, LedgerResult, PostingId};
use rust_decimal::Decimal;

use crate::account::Account;
use crate::posting::{NewPosting, Posting};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique transaction id.
pub(crate) fn next_tx_id() -> u64 {
    NEXT_TX_ID.fetch_add(1, Ordering::Relaxed)
}

/// Proof that the holding transaction has the exclusive lock on one account.
///
/// Cannot be constructed outside this crate and is not `Clone`.
#[derive(Debug)]
pub struct AccountLock {
    account: Account,
    tx_id: u64,
}

impl AccountLock {
    pub(crate) fn new(account: Account, tx_id: u64) -> Self {
        Self { account, tx_id }
    }

    /// The locked account, as read under the lock.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Id of the locked account.
    pub fn account_id(&self) -> AccountId {
        self.account.id
    }

    /// Reject a lock granted to a different transaction.
    pub(crate) fn verify(&self, tx_id: u64) -> LedgerResult<()> {
        if self.tx_id != tx_id {
            return Err(LedgerError::InvariantViolation(format!(
                "lock on account {} used outside the transaction that acquired it",
                self.account.id
            )));
        }
        Ok(())
    }
}

/// One durable transaction against the ledger.
#[async_trait]
pub trait LedgerTx: Send {
    /// Acquire the exclusive lock on an account for the rest of this
    /// transaction. Blocks while another transaction holds it.
    ///
    /// Returns `AccountNotFound` if the account does not exist.
    async fn lock_account(&mut self, account_id: AccountId) -> LedgerResult<AccountLock>;

    /// Insert a new account. Fails with `DuplicateDocumentNumber` and leaves
    /// no row behind if the document number is taken.
    async fn insert_account(&mut self, document_number: &str) -> LedgerResult<Account>;

    /// Postings of the locked account with `remaining_balance < 0`, oldest
    /// `event_time` first, ties by ascending id.
    async fn select_outstanding_debits(&mut self, lock: &AccountLock) -> LedgerResult<Vec<Posting>>;

    /// Overwrite the remaining balance of one posting of the locked account.
    /// Idempotent.
    async fn update_posting_balance(
        &mut self,
        lock: &AccountLock,
        posting_id: PostingId,
        remaining_balance: Decimal,
    ) -> LedgerResult<()>;

    /// Insert a posting for the locked account. The store assigns `id` and
    /// `event_time`.
    async fn insert_posting(&mut self, lock: &AccountLock, posting: NewPosting) -> LedgerResult<Posting>;

    /// Delete the locked account together with its postings.
    async fn delete_account(&mut self, lock: AccountLock) -> LedgerResult<()>;

    /// Make every write of this transaction visible and release its locks.
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    /// Discard every write of this transaction and release its locks.
    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Durable record of accounts and their postings.
///
/// Plain reads outside a transaction never lock and see the latest
/// committed state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// Read an account.
    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account>;

    /// Read a posting.
    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting>;

    /// All postings of an account ordered by `(event_time, id)`.
    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>>;

    /// Administrative delete of an account and its postings.
    ///
    /// Takes the account lock, so it waits for in-flight postings to the
    /// same account.
    async fn delete_account(&self, account_id: AccountId) -> LedgerResult<()> {
        let mut tx = self.begin().await?;
        let lock = match tx.lock_account(account_id).await {
            Ok(lock) => lock,
            Err(LedgerError::AccountNotFound(id)) => return Err(LedgerError::account_not_found(id)),
            Err(e) => return Err(e),
        };
        tx.delete_account(lock).await?;
        tx.commit().await
    }
}

#[async_trait]
impl<S> LedgerStore for std::sync::Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        (**self).begin().await
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        (**self).get_account(account_id).await
    }

    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        (**self).get_posting(posting_id).await
    }

    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        (**self).list_postings(account_id).await
    }

    async fn delete_account(&self, account_id: AccountId) -> LedgerResult<()> {
        (**self).delete_account(account_id).await
    }
}
