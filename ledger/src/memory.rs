//! In-memory ledger store.
//!
//! Same observable semantics as the PostgreSQL backend: per-account
//! exclusive locks held until the end of the transaction, writes staged
//! privately and published atomically on commit, reads outside a
//! transaction see committed state only. Intended for tests, the simulator
//! and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use payledger_common::{now, AccountId, LedgerError, LedgerResult, PostingId};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::account::Account;
use crate::posting::{NewPosting, Posting};
use crate::store::{next_tx_id, AccountLock, LedgerStore, LedgerTx};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    documents: HashMap<String, AccountId>,
    postings: BTreeMap<PostingId, Posting>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    next_account_id: AtomicI64,
    next_posting_id: AtomicI64,
    lock_timeout: Option<Duration>,
}

impl Shared {
    fn account_mutex(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// In-memory ledger store.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty store whose account lock waits give up after
    /// `timeout` with `LedgerError::Timeout`.
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                account_locks: DashMap::new(),
                next_account_id: AtomicI64::new(1),
                next_posting_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Number of committed accounts.
    pub fn account_count(&self) -> usize {
        self.shared.tables.read().accounts.len()
    }

    /// Number of committed postings.
    pub fn posting_count(&self) -> usize {
        self.shared.tables.read().postings.len()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(InMemoryTx {
            id: next_tx_id(),
            shared: self.shared.clone(),
            held: HashMap::new(),
            new_accounts: Vec::new(),
            new_postings: Vec::new(),
            balance_updates: HashMap::new(),
            deleted_accounts: Vec::new(),
        }))
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.shared
            .tables
            .read()
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        self.shared
            .tables
            .read()
            .postings
            .get(&posting_id)
            .cloned()
            .ok_or_else(|| LedgerError::posting_not_found(posting_id))
    }

    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        let tables = self.shared.tables.read();
        if !tables.accounts.contains_key(&account_id) {
            return Err(LedgerError::account_not_found(account_id));
        }
        let mut postings: Vec<Posting> = tables
            .postings
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        postings.sort_by_key(Posting::settlement_key);
        Ok(postings)
    }
}

/// Transaction over the in-memory store.
///
/// Holds the guards of every account it locked; they are released when the
/// transaction is dropped, which `commit` and `rollback` both do.
struct InMemoryTx {
    id: u64,
    shared: Arc<Shared>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    new_accounts: Vec<Account>,
    new_postings: Vec<Posting>,
    balance_updates: HashMap<PostingId, Decimal>,
    deleted_accounts: Vec<AccountId>,
}

impl InMemoryTx {
    fn find_account(&self, account_id: AccountId) -> Option<Account> {
        if self.deleted_accounts.contains(&account_id) {
            return None;
        }
        self.new_accounts
            .iter()
            .find(|a| a.id == account_id)
            .cloned()
            .or_else(|| self.shared.tables.read().accounts.get(&account_id).cloned())
    }

    fn check_held(&self, lock: &AccountLock) -> LedgerResult<()> {
        lock.verify(self.id)?;
        if !self.held.contains_key(&lock.account_id()) {
            return Err(LedgerError::InvariantViolation(format!(
                "account {} is not locked by this transaction",
                lock.account_id()
            )));
        }
        Ok(())
    }

    fn is_document_taken(&self, tables: &Tables, document_number: &str) -> bool {
        let committed = tables
            .documents
            .get(document_number)
            .map(|id| !self.deleted_accounts.contains(id))
            .unwrap_or(false);
        committed
            || self
                .new_accounts
                .iter()
                .any(|a| a.document_number == document_number)
    }

    async fn acquire(&self, account_id: AccountId) -> LedgerResult<OwnedMutexGuard<()>> {
        let mutex = self.shared.account_mutex(account_id);
        match self.shared.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, mutex.lock_owned())
                .await
                .map_err(|_| {
                    LedgerError::Timeout(format!("waiting for lock on account {account_id}"))
                }),
            None => Ok(mutex.lock_owned().await),
        }
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_account(&mut self, account_id: AccountId) -> LedgerResult<AccountLock> {
        if self.find_account(account_id).is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        if !self.held.contains_key(&account_id) {
            let guard = self.acquire(account_id).await?;
            self.held.insert(account_id, guard);
        }

        // The account may have been deleted while we waited.
        match self.find_account(account_id) {
            Some(account) => {
                debug!(tx = self.id, account_id = %account_id, "Account locked");
                Ok(AccountLock::new(account, self.id))
            }
            None => {
                self.held.remove(&account_id);
                self.shared.account_locks.remove(&account_id);
                Err(LedgerError::AccountNotFound(account_id))
            }
        }
    }

    async fn insert_account(&mut self, document_number: &str) -> LedgerResult<Account> {
        let taken = {
            let tables = self.shared.tables.read();
            self.is_document_taken(&tables, document_number)
        };
        if taken {
            return Err(LedgerError::DuplicateDocumentNumber(document_number.to_string()));
        }

        let id = AccountId::new(self.shared.next_account_id.fetch_add(1, Ordering::SeqCst));
        let account = Account::new(id, document_number, now());
        self.new_accounts.push(account.clone());
        Ok(account)
    }

    async fn select_outstanding_debits(&mut self, lock: &AccountLock) -> LedgerResult<Vec<Posting>> {
        self.check_held(lock)?;
        let account_id = lock.account_id();

        let mut debits: Vec<Posting> = {
            let tables = self.shared.tables.read();
            tables
                .postings
                .values()
                .filter(|p| p.account_id == account_id)
                .cloned()
                .collect()
        };
        debits.extend(
            self.new_postings
                .iter()
                .filter(|p| p.account_id == account_id)
                .cloned(),
        );
        for posting in &mut debits {
            if let Some(balance) = self.balance_updates.get(&posting.id) {
                posting.remaining_balance = *balance;
            }
        }
        debits.retain(Posting::is_outstanding);
        debits.sort_by_key(Posting::settlement_key);
        Ok(debits)
    }

    async fn update_posting_balance(
        &mut self,
        lock: &AccountLock,
        posting_id: PostingId,
        remaining_balance: Decimal,
    ) -> LedgerResult<()> {
        self.check_held(lock)?;
        let account_id = lock.account_id();

        if let Some(staged) = self
            .new_postings
            .iter_mut()
            .find(|p| p.id == posting_id && p.account_id == account_id)
        {
            staged.remaining_balance = remaining_balance;
            return Ok(());
        }

        let belongs = self
            .shared
            .tables
            .read()
            .postings
            .get(&posting_id)
            .map(|p| p.account_id == account_id)
            .unwrap_or(false);
        if !belongs {
            return Err(LedgerError::posting_not_found(posting_id));
        }

        self.balance_updates.insert(posting_id, remaining_balance);
        Ok(())
    }

    async fn insert_posting(&mut self, lock: &AccountLock, posting: NewPosting) -> LedgerResult<Posting> {
        self.check_held(lock)?;

        let id = PostingId::new(self.shared.next_posting_id.fetch_add(1, Ordering::SeqCst));
        let posting = Posting {
            id,
            account_id: lock.account_id(),
            posting_type: posting.posting_type,
            amount: posting.amount,
            remaining_balance: posting.remaining_balance,
            event_time: now(),
        };
        self.new_postings.push(posting.clone());
        Ok(posting)
    }

    async fn delete_account(&mut self, lock: AccountLock) -> LedgerResult<()> {
        self.check_held(&lock)?;
        let account_id = lock.account_id();
        self.new_accounts.retain(|a| a.id != account_id);
        self.new_postings.retain(|p| p.account_id != account_id);
        self.deleted_accounts.push(account_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let mut tables = self.shared.tables.write();

        // Unique index check against everything committed meanwhile.
        for account in &self.new_accounts {
            if let Some(existing) = tables.documents.get(&account.document_number) {
                if !self.deleted_accounts.contains(existing) {
                    return Err(LedgerError::DuplicateDocumentNumber(
                        account.document_number.clone(),
                    ));
                }
            }
        }

        for account_id in &self.deleted_accounts {
            if let Some(account) = tables.accounts.remove(account_id) {
                tables.documents.remove(&account.document_number);
            }
            tables.postings.retain(|_, p| p.account_id != *account_id);
        }
        for account in &self.new_accounts {
            tables
                .documents
                .insert(account.document_number.clone(), account.id);
            tables.accounts.insert(account.id, account.clone());
        }
        for posting in &self.new_postings {
            tables.postings.insert(posting.id, posting.clone());
        }
        // Ids are never reused, so a deleted account's mutex can go. Our own
        // guard keeps it alive until this transaction is dropped.
        for account_id in &self.deleted_accounts {
            self.shared.account_locks.remove(account_id);
        }
        for (posting_id, balance) in &self.balance_updates {
            if let Some(posting) = tables.postings.get_mut(posting_id) {
                posting.remaining_balance = *balance;
            }
        }

        debug!(
            tx = self.id,
            accounts = self.new_accounts.len(),
            postings = self.new_postings.len(),
            updates = self.balance_updates.len(),
            "Transaction committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        debug!(tx = self.id, "Transaction rolled back");
        Ok(())
    }
}
