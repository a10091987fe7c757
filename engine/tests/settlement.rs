//! Settlement engine tests against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use payledger_common::{AccountId, LedgerError, LedgerResult, PostingId, PostingType};
use payledger_engine::{EngineConfig, SettlementEngine};
use payledger_ledger::{
    Account, AccountLock, InMemoryLedgerStore, LedgerStore, LedgerTx, NewPosting, Posting,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn engine() -> SettlementEngine<InMemoryLedgerStore> {
    SettlementEngine::new(InMemoryLedgerStore::new(), EngineConfig::default())
}

async fn remaining(engine: &SettlementEngine<InMemoryLedgerStore>, id: PostingId) -> Decimal {
    engine.get_posting(id).await.unwrap().remaining_balance
}

#[tokio::test]
async fn test_debits_untouched_without_credit() {
    let engine = engine();
    let account = engine.create_account("10000000001").await.unwrap();

    let mut ids = Vec::new();
    for amount in [dec!(-50.00), dec!(-23.50), dec!(-18.70)] {
        let result = engine
            .post_transaction(account.id, PostingType::NormalPurchase, amount)
            .await
            .unwrap();
        assert_eq!(result.account_id, account.id);
        ids.push((result.posting_id, amount));
    }

    for (id, amount) in ids {
        assert_eq!(remaining(&engine, id).await, amount);
    }
}

#[tokio::test]
async fn test_fifo_partial_settlement() {
    let engine = engine();
    let account = engine.create_account("10000000002").await.unwrap();

    let d1 = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-50))
        .await
        .unwrap();
    let d2 = engine
        .post_transaction(account.id, PostingType::Withdrawal, dec!(-30))
        .await
        .unwrap();
    let credit = engine
        .post_transaction(account.id, PostingType::CreditVoucher, dec!(40))
        .await
        .unwrap();

    assert_eq!(remaining(&engine, d1.posting_id).await, dec!(-10));
    assert_eq!(remaining(&engine, d2.posting_id).await, dec!(-30));
    assert_eq!(remaining(&engine, credit.posting_id).await, dec!(0));
}

#[tokio::test]
async fn test_exact_settlement() {
    let engine = engine();
    let account = engine.create_account("10000000003").await.unwrap();

    let d1 = engine
        .post_transaction(account.id, PostingType::InstallmentPurchase, dec!(-50))
        .await
        .unwrap();
    let credit = engine
        .post_transaction(account.id, PostingType::CreditVoucher, dec!(50))
        .await
        .unwrap();

    assert_eq!(remaining(&engine, d1.posting_id).await, dec!(0));
    assert_eq!(remaining(&engine, credit.posting_id).await, dec!(0));
}

#[tokio::test]
async fn test_overshoot_leaves_inert_credit() {
    let engine = engine();
    let account = engine.create_account("10000000004").await.unwrap();

    let d1 = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-20))
        .await
        .unwrap();
    let credit = engine
        .post_transaction(account.id, PostingType::CreditVoucher, dec!(50))
        .await
        .unwrap();
    assert_eq!(remaining(&engine, d1.posting_id).await, dec!(0));
    assert_eq!(remaining(&engine, credit.posting_id).await, dec!(30));

    // Leftover credit is not applied to later debits.
    let d2 = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-10))
        .await
        .unwrap();
    assert_eq!(remaining(&engine, d2.posting_id).await, dec!(-10));
    assert_eq!(remaining(&engine, credit.posting_id).await, dec!(30));
}

#[tokio::test]
async fn test_missing_account_creates_nothing() {
    let engine = engine();

    let err = engine
        .post_transaction(AccountId::new(42), PostingType::CreditVoucher, dec!(10))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::AccountNotFound(id) if id == AccountId::new(42)));
    assert_eq!(engine.store().account_count(), 0);
    assert_eq!(engine.store().posting_count(), 0);
    assert_eq!(engine.metrics().snapshot().failures, 1);
}

#[tokio::test]
async fn test_get_posting_is_stable_between_postings() {
    let engine = engine();
    let account = engine.create_account("10000000005").await.unwrap();
    let result = engine
        .post_transaction(account.id, PostingType::Withdrawal, dec!(-12.34))
        .await
        .unwrap();

    let first = engine.get_posting(result.posting_id).await.unwrap();
    let second = engine.get_posting(result.posting_id).await.unwrap();
    assert_eq!(first, second);

    let err = engine.get_posting(PostingId::new(999)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
}

#[tokio::test]
async fn test_create_account_validation() {
    let engine = engine();

    let err = engine.create_account("   ").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPosting { field: Some(ref f), .. } if f == "document_number"));

    engine.create_account("10000000006").await.unwrap();
    let err = engine.create_account("10000000006").await.unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateDocumentNumber(_)));
    assert_eq!(engine.store().account_count(), 1);
    assert_eq!(engine.metrics().snapshot().accounts_created, 1);
}

#[tokio::test]
async fn test_post_operation_resolves_and_signs() {
    let engine = engine();
    let account = engine.create_account("10000000007").await.unwrap();

    let debit = engine
        .post_operation(account.id, 3, dec!(25.5))
        .await
        .unwrap();
    let posting = engine.get_posting(debit.posting_id).await.unwrap();
    assert_eq!(posting.posting_type, PostingType::Withdrawal);
    assert_eq!(posting.amount, dec!(-25.50));

    let credit = engine
        .post_operation(account.id, 4, dec!(10))
        .await
        .unwrap();
    let posting = engine.get_posting(credit.posting_id).await.unwrap();
    assert_eq!(posting.amount, dec!(10));
    assert_eq!(posting.remaining_balance, dec!(0));
    assert_eq!(remaining(&engine, debit.posting_id).await, dec!(-15.50));
}

#[tokio::test]
async fn test_post_operation_rejects_bad_input() {
    let engine = engine();
    let account = engine.create_account("10000000008").await.unwrap();

    let err = engine.post_operation(account.id, 5, dec!(10)).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownPostingType(5)));

    let err = engine.post_operation(account.id, 1, dec!(0)).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_POSTING");

    let err = engine.post_operation(account.id, 1, dec!(-3)).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_POSTING");

    let err = engine.post_operation(account.id, 1, dec!(1.234)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPosting { field: Some(ref f), .. } if f == "amount"));

    assert_eq!(engine.store().posting_count(), 0);
}

#[tokio::test]
async fn test_account_position_and_conservation() {
    let engine = engine();
    let account = engine.create_account("10000000009").await.unwrap();

    engine.post_transaction(account.id, PostingType::NormalPurchase, dec!(-50.0)).await.unwrap();
    engine.post_transaction(account.id, PostingType::NormalPurchase, dec!(-23.5)).await.unwrap();
    engine.post_transaction(account.id, PostingType::NormalPurchase, dec!(-18.7)).await.unwrap();
    engine.post_transaction(account.id, PostingType::CreditVoucher, dec!(60.0)).await.unwrap();

    let position = engine.account_position(account.id).await.unwrap();
    assert_eq!(position.outstanding_debt, dec!(32.2));
    assert_eq!(position.open_debits, 2);
    assert!(position.is_conserved());

    let postings = engine.account_postings(account.id).await.unwrap();
    assert_eq!(postings.len(), 4);
    assert!(postings.iter().all(Posting::is_within_bounds));

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.postings_recorded, 4);
    assert_eq!(snapshot.credits_applied, 1);
    assert_eq!(snapshot.debits_touched, 2);
    assert_eq!(snapshot.debits_settled, 1);
}

#[tokio::test]
async fn test_delete_account_cascades() {
    let engine = engine();
    let account = engine.create_account("10000000010").await.unwrap();
    let posting = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-5))
        .await
        .unwrap();

    engine.delete_account(account.id).await.unwrap();
    assert!(engine.get_account(account.id).await.unwrap_err().is_not_found());
    assert!(engine.get_posting(posting.posting_id).await.unwrap_err().is_not_found());
    assert!(engine.account_postings(account.id).await.unwrap_err().is_not_found());

    let err = engine.delete_account(account.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));

    // The document number is free again.
    engine.create_account("10000000010").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credits_settle_debit_once() {
    let engine = Arc::new(engine());
    let account = engine.create_account("10000000011").await.unwrap();
    let debit = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-50))
        .await
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .post_transaction(account.id, PostingType::CreditVoucher, dec!(50))
                    .await
            })
        })
        .collect();

    let mut leftovers = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        leftovers.push(remaining(&engine, result.posting_id).await);
    }
    leftovers.sort();

    assert_eq!(leftovers, vec![dec!(0), dec!(50)]);
    assert_eq!(remaining(&engine, debit.posting_id).await, dec!(0));
    assert_eq!(engine.metrics().snapshot().debits_settled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_postings_conserve_value() {
    let engine = Arc::new(engine());
    let mut accounts = Vec::new();
    for i in 0..4 {
        accounts.push(engine.create_account(&format!("2000000000{i}")).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for i in 0..64u32 {
        let engine = engine.clone();
        let account_id = accounts[i as usize % accounts.len()];
        handles.push(tokio::spawn(async move {
            let (posting_type, amount) = if i % 3 == 0 {
                (PostingType::CreditVoucher, Decimal::new(i64::from(i) * 137 + 100, 2))
            } else {
                (PostingType::NormalPurchase, -Decimal::new(i64::from(i) * 89 + 50, 2))
            };
            engine.post_transaction(account_id, posting_type, amount).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for account_id in accounts {
        let position = engine.account_position(account_id).await.unwrap();
        assert!(position.is_conserved(), "account {account_id} not conserved");
        let postings = engine.account_postings(account_id).await.unwrap();
        assert!(postings.iter().all(Posting::is_within_bounds));
    }
    assert_eq!(engine.store().posting_count(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_rolls_back_while_other_accounts_proceed() {
    let engine = engine();
    let a = engine.create_account("10000000012").await.unwrap();
    let b = engine.create_account("10000000013").await.unwrap();

    // Hold account A's lock from outside the engine.
    let mut holder = engine.store().begin().await.unwrap();
    let _lock = holder.lock_account(a.id).await.unwrap();

    let err = engine
        .post_transaction_within(
            a.id,
            PostingType::CreditVoucher,
            dec!(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
    assert!(err.is_retryable());

    engine
        .post_transaction(b.id, PostingType::CreditVoucher, dec!(10))
        .await
        .unwrap();

    holder.rollback().await.unwrap();
    assert!(engine.account_postings(a.id).await.unwrap().is_empty());

    // Lock released by the rollback.
    engine
        .post_transaction(a.id, PostingType::CreditVoucher, dec!(10))
        .await
        .unwrap();

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.timeouts, 1);
    assert_eq!(snapshot.postings_recorded, 2);
}

#[tokio::test]
async fn test_store_lock_timeout_surfaces_as_timeout() {
    let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
    let engine = SettlementEngine::new(store, EngineConfig::default());
    let account = engine.create_account("10000000014").await.unwrap();

    let mut holder = engine.store().begin().await.unwrap();
    let _lock = holder.lock_account(account.id).await.unwrap();

    let err = engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
}

#[test]
fn test_posting_result_serializes() {
    let result = payledger_engine::PostingResult {
        posting_id: PostingId::new(7),
        account_id: AccountId::new(3),
    };
    let json = serde_json::to_string(&result).unwrap();
    assert_eq!(json, r#"{"posting_id":7,"account_id":3}"#);
}

/// Store whose transactions hand out resolved postings as outstanding.
struct CorruptStore(InMemoryLedgerStore);

struct CorruptTx(Box<dyn LedgerTx>);

#[async_trait]
impl LedgerStore for CorruptStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(CorruptTx(self.0.begin().await?)))
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.0.get_account(account_id).await
    }

    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        self.0.get_posting(posting_id).await
    }

    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        self.0.list_postings(account_id).await
    }
}

#[async_trait]
impl LedgerTx for CorruptTx {
    async fn lock_account(&mut self, account_id: AccountId) -> LedgerResult<AccountLock> {
        self.0.lock_account(account_id).await
    }

    async fn insert_account(&mut self, document_number: &str) -> LedgerResult<Account> {
        self.0.insert_account(document_number).await
    }

    async fn select_outstanding_debits(&mut self, lock: &AccountLock) -> LedgerResult<Vec<Posting>> {
        let mut debits = self.0.select_outstanding_debits(lock).await?;
        for debit in &mut debits {
            debit.remaining_balance = Decimal::ZERO;
        }
        Ok(debits)
    }

    async fn update_posting_balance(
        &mut self,
        lock: &AccountLock,
        posting_id: PostingId,
        remaining_balance: Decimal,
    ) -> LedgerResult<()> {
        self.0.update_posting_balance(lock, posting_id, remaining_balance).await
    }

    async fn insert_posting(&mut self, lock: &AccountLock, posting: NewPosting) -> LedgerResult<Posting> {
        self.0.insert_posting(lock, posting).await
    }

    async fn delete_account(&mut self, lock: AccountLock) -> LedgerResult<()> {
        self.0.delete_account(lock).await
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.0.commit().await
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.0.rollback().await
    }
}

#[tokio::test]
async fn test_non_outstanding_debit_aborts_posting() {
    let inner = InMemoryLedgerStore::new();
    let engine = SettlementEngine::new(CorruptStore(inner.clone()), EngineConfig::default());
    let account = engine.create_account("10000000015").await.unwrap();
    engine
        .post_transaction(account.id, PostingType::NormalPurchase, dec!(-10))
        .await
        .unwrap();

    let err = engine
        .post_transaction(account.id, PostingType::CreditVoucher, dec!(10))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvariantViolation(_)));
    assert!(!err.is_retryable());

    // Rolled back: only the debit exists, still outstanding.
    let postings = inner.list_postings(account.id).await.unwrap();
    assert_eq!(postings.len(), 1);
    assert_eq!(postings[0].remaining_balance, dec!(-10));
}

/// Store whose commits publish immediately but acknowledge late.
struct SlowCommitStore {
    inner: InMemoryLedgerStore,
    delay: Duration,
}

struct SlowCommitTx {
    inner: Box<dyn LedgerTx>,
    delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowCommitStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(SlowCommitTx {
            inner: self.inner.begin().await?,
            delay: self.delay,
        }))
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.inner.get_account(account_id).await
    }

    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        self.inner.get_posting(posting_id).await
    }

    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        self.inner.list_postings(account_id).await
    }
}

#[async_trait]
impl LedgerTx for SlowCommitTx {
    async fn lock_account(&mut self, account_id: AccountId) -> LedgerResult<AccountLock> {
        self.inner.lock_account(account_id).await
    }

    async fn insert_account(&mut self, document_number: &str) -> LedgerResult<Account> {
        self.inner.insert_account(document_number).await
    }

    async fn select_outstanding_debits(&mut self, lock: &AccountLock) -> LedgerResult<Vec<Posting>> {
        self.inner.select_outstanding_debits(lock).await
    }

    async fn update_posting_balance(
        &mut self,
        lock: &AccountLock,
        posting_id: PostingId,
        remaining_balance: Decimal,
    ) -> LedgerResult<()> {
        self.inner
            .update_posting_balance(lock, posting_id, remaining_balance)
            .await
    }

    async fn insert_posting(&mut self, lock: &AccountLock, posting: NewPosting) -> LedgerResult<Posting> {
        self.inner.insert_posting(lock, posting).await
    }

    async fn delete_account(&mut self, lock: AccountLock) -> LedgerResult<()> {
        self.inner.delete_account(lock).await
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.inner.commit().await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_slow_commit_is_not_reported_as_timeout() {
    let inner = InMemoryLedgerStore::new();
    let engine = SettlementEngine::new(
        SlowCommitStore {
            inner: inner.clone(),
            delay: Duration::from_millis(200),
        },
        EngineConfig::default(),
    );
    let account = engine.create_account("10000000016").await.unwrap();

    let result = engine
        .post_transaction_within(
            account.id,
            PostingType::NormalPurchase,
            dec!(-10),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

    let posting = inner.get_posting(result.posting_id).await.unwrap();
    assert_eq!(posting.remaining_balance, dec!(-10));
    assert_eq!(inner.posting_count(), 1);

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.timeouts, 0);
    assert_eq!(snapshot.postings_recorded, 1);
}
