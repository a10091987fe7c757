//! Payledger Common Types
//!
//! Shared vocabulary of the ledger: identifiers, posting types and their
//! debit/credit classification, amount helpers and the error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod posting_type;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use posting_type::*;
pub use error::*;
pub use time::*;
