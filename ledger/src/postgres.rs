//! PostgreSQL ledger store.
//!
//! The account lock is the `accounts` row lock taken with
//! `SELECT ... FOR UPDATE`; PostgreSQL releases it when the transaction
//! commits or rolls back, and an sqlx transaction dropped without commit is
//! rolled back when its connection returns to the pool.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | LedgerError |
//! |------------|----------|-------------|
//! | Database (unique violation) | `23505` | `DuplicateDocumentNumber` |
//! | Database (lock not available) | `55P03` | `Timeout` |
//! | Database (query canceled) | `57014` | `Timeout` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | anything else | any | `StorageFailure` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payledger_common::{
    as_pg_millis, AccountId, LedgerError, LedgerResult, PostingId, PostingType,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use crate::account::Account;
use crate::posting::{NewPosting, Posting};
use crate::store::{next_tx_id, AccountLock, LedgerStore, LedgerTx};

const POSTING_COLUMNS: &str =
    "id, account_id, operation_type_id, amount, remaining_balance, event_time";

/// PostgreSQL-backed ledger store.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    /// Open a connection pool and wrap it.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound how long a transaction waits for an account row lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageFailure(format!("migration failed: {e}")))?;
        info!("Ledger schema migrations applied");
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(timeout) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(as_pg_millis(timeout))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        }

        Ok(Box::new(PgLedgerTx { id: next_tx_id(), tx }))
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        let row = sqlx::query("SELECT id, document_number, created_at FROM accounts WHERE id = $1")
            .bind(account_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(LedgerError::account_not_found(account_id)),
        }
    }

    #[instrument(skip(self), fields(posting_id = %posting_id))]
    async fn get_posting(&self, posting_id: PostingId) -> LedgerResult<Posting> {
        let row = sqlx::query(&format!("SELECT {POSTING_COLUMNS} FROM postings WHERE id = $1"))
            .bind(posting_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_posting", e))?;

        match row {
            Some(row) => posting_from_row(&row),
            None => Err(LedgerError::posting_not_found(posting_id)),
        }
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_postings(&self, account_id: AccountId) -> LedgerResult<Vec<Posting>> {
        // Existence check first so an unknown account is distinguishable
        // from an account without postings.
        self.get_account(account_id).await?;

        let rows = sqlx::query(&format!(
            "SELECT {POSTING_COLUMNS} FROM postings WHERE account_id = $1 ORDER BY event_time, id"
        ))
        .bind(account_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_postings", e))?;

        rows.iter().map(posting_from_row).collect()
    }
}

/// One PostgreSQL transaction.
struct PgLedgerTx {
    id: u64,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, account_id: AccountId) -> LedgerResult<AccountLock> {
        let row = sqlx::query(
            "SELECT id, document_number, created_at FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_account", e))?;

        let account = match row {
            Some(row) => account_from_row(&row)?,
            None => return Err(LedgerError::AccountNotFound(account_id)),
        };

        debug!(tx = self.id, account_id = %account_id, "Account row locked");
        Ok(AccountLock::new(account, self.id))
    }

    async fn insert_account(&mut self, document_number: &str) -> LedgerResult<Account> {
        let row = sqlx::query(
            "INSERT INTO accounts (document_number) VALUES ($1) \
             RETURNING id, document_number, created_at",
        )
        .bind(document_number)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_account", e) {
            LedgerError::DuplicateDocumentNumber(_) => {
                LedgerError::DuplicateDocumentNumber(document_number.to_string())
            }
            other => other,
        })?;

        account_from_row(&row)
    }

    async fn select_outstanding_debits(&mut self, lock: &AccountLock) -> LedgerResult<Vec<Posting>> {
        lock.verify(self.id)?;

        let rows = sqlx::query(&format!(
            "SELECT {POSTING_COLUMNS} FROM postings \
             WHERE account_id = $1 AND remaining_balance < 0 \
             ORDER BY event_time, id"
        ))
        .bind(lock.account_id().get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("select_outstanding_debits", e))?;

        rows.iter().map(posting_from_row).collect()
    }

    async fn update_posting_balance(
        &mut self,
        lock: &AccountLock,
        posting_id: PostingId,
        remaining_balance: Decimal,
    ) -> LedgerResult<()> {
        lock.verify(self.id)?;

        let result = sqlx::query(
            "UPDATE postings SET remaining_balance = $1 WHERE id = $2 AND account_id = $3",
        )
        .bind(remaining_balance)
        .bind(posting_id.get())
        .bind(lock.account_id().get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_posting_balance", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::posting_not_found(posting_id));
        }
        Ok(())
    }

    async fn insert_posting(&mut self, lock: &AccountLock, posting: NewPosting) -> LedgerResult<Posting> {
        lock.verify(self.id)?;

        let row = sqlx::query(&format!(
            "INSERT INTO postings (account_id, operation_type_id, amount, remaining_balance) \
             VALUES ($1, $2, $3, $4) RETURNING {POSTING_COLUMNS}"
        ))
        .bind(lock.account_id().get())
        .bind(posting.posting_type.code())
        .bind(posting.amount)
        .bind(posting.remaining_balance)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_posting", e))?;

        posting_from_row(&row)
    }

    async fn delete_account(&mut self, lock: AccountLock) -> LedgerResult<()> {
        lock.verify(self.id)?;

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(lock.account_id().get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let id = self.id;
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        debug!(tx = id, "Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        let id = self.id;
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;
        debug!(tx = id, "Transaction rolled back");
        Ok(())
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: i64,
    document_number: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            document_number: row.try_get("document_number")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug)]
struct PostingRow {
    id: i64,
    account_id: i64,
    operation_type_id: i16,
    amount: Decimal,
    remaining_balance: Decimal,
    event_time: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PostingRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PostingRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            operation_type_id: row.try_get("operation_type_id")?,
            amount: row.try_get("amount")?,
            remaining_balance: row.try_get("remaining_balance")?,
            event_time: row.try_get("event_time")?,
        })
    }
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    let row = AccountRow::from_row(row).map_err(|e| map_sqlx_error("decode_account", e))?;
    Ok(Account::new(AccountId::new(row.id), row.document_number, row.created_at))
}

fn posting_from_row(row: &PgRow) -> LedgerResult<Posting> {
    let row = PostingRow::from_row(row).map_err(|e| map_sqlx_error("decode_posting", e))?;
    let posting_type = PostingType::from_code(row.operation_type_id).ok_or_else(|| {
        LedgerError::InvariantViolation(format!(
            "posting {} has unknown operation type {}",
            row.id, row.operation_type_id
        ))
    })?;

    Ok(Posting {
        id: PostingId::new(row.id),
        account_id: AccountId::new(row.account_id),
        posting_type,
        amount: row.amount,
        remaining_balance: row.remaining_balance,
        event_time: row.event_time,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerError::DuplicateDocumentNumber(msg),
                // lock_not_available, query_canceled
                Some("55P03") | Some("57014") => LedgerError::Timeout(msg),
                _ => LedgerError::StorageFailure(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Timeout(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::StorageFailure(format!("connection pool closed in {}", operation))
        }
        other => LedgerError::StorageFailure(format!("sqlx error in {}: {}", operation, other)),
    }
}
