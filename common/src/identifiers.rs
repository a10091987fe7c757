//! Identifier types for ledger entities.
//!
//! Both identifiers are surrogate keys assigned by the store at insertion
//! time. They are monotonically increasing but may have gaps (a rolled back
//! insert still consumes a value).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw store key.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw store key.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl FromStr for AccountId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Unique identifier for a posting (one ledger entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingId(i64);

impl PostingId {
    /// Wrap a raw store key.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw store key.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PostingId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl FromStr for PostingId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_parse() {
        let id: AccountId = " 42 ".parse().unwrap();
        assert_eq!(id, AccountId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("abc".parse::<AccountId>().is_err());
    }

    #[test]
    fn test_posting_ids_order_by_key() {
        let mut ids = vec![PostingId::new(3), PostingId::new(1), PostingId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![PostingId::new(1), PostingId::new(2), PostingId::new(3)]);
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&AccountId::new(7)).unwrap();
        assert_eq!(json, "7");
        let id: PostingId = serde_json::from_str("11").unwrap();
        assert_eq!(id.get(), 11);
    }
}
