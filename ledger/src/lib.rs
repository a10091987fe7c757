//! Payledger Ledger Store
//!
//! Durable record of accounts and postings behind the [`LedgerStore`]
//! boundary, with a PostgreSQL backend for production and an in-memory
//! backend for tests and simulation.

pub mod account;
pub mod posting;
pub mod position;
pub mod store;
pub mod memory;
pub mod postgres;

pub use account::Account;
pub use posting::{NewPosting, Posting};
pub use position::AccountPosition;
pub use store::{AccountLock, LedgerStore, LedgerTx};
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;
