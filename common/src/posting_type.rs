//! Posting types, their debit/credit classification and the catalog that
//! maps external operation-type codes onto them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Economic direction of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingClass {
    /// Reduces the account's position. Stored with a negative amount.
    Debit,
    /// Restores the account's position. Stored with a positive amount.
    Credit,
}

/// Kind of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingType {
    /// Single-payment purchase.
    NormalPurchase,
    /// Purchase paid in installments.
    InstallmentPurchase,
    /// Cash withdrawal.
    Withdrawal,
    /// Credit voucher (payment towards the account).
    CreditVoucher,
}

impl PostingType {
    /// All posting types in code order.
    pub const ALL: [PostingType; 4] = [
        PostingType::NormalPurchase,
        PostingType::InstallmentPurchase,
        PostingType::Withdrawal,
        PostingType::CreditVoucher,
    ];

    /// Debit/credit classification.
    pub fn class(&self) -> PostingClass {
        match self {
            PostingType::NormalPurchase
            | PostingType::InstallmentPurchase
            | PostingType::Withdrawal => PostingClass::Debit,
            PostingType::CreditVoucher => PostingClass::Credit,
        }
    }

    /// Check if this is a debit-class posting.
    pub fn is_debit(&self) -> bool {
        self.class() == PostingClass::Debit
    }

    /// Check if this is a credit-class posting.
    pub fn is_credit(&self) -> bool {
        self.class() == PostingClass::Credit
    }

    /// Apply the sign rule to an unsigned magnitude.
    ///
    /// The sign of `magnitude` is ignored; debit-class types always yield a
    /// non-positive amount and credit-class types a non-negative one.
    pub fn signed(&self, magnitude: Decimal) -> Decimal {
        match self.class() {
            PostingClass::Debit => -magnitude.abs(),
            PostingClass::Credit => magnitude.abs(),
        }
    }

    /// Stable operation-type code persisted by the store.
    pub fn code(&self) -> i16 {
        match self {
            PostingType::NormalPurchase => 1,
            PostingType::InstallmentPurchase => 2,
            PostingType::Withdrawal => 3,
            PostingType::CreditVoucher => 4,
        }
    }

    /// Reverse of [`PostingType::code`].
    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Human readable description.
    pub fn description(&self) -> &'static str {
        match self {
            PostingType::NormalPurchase => "Normal Purchase",
            PostingType::InstallmentPurchase => "Purchase with installments",
            PostingType::Withdrawal => "Withdrawal",
            PostingType::CreditVoucher => "Credit Voucher",
        }
    }
}

impl fmt::Display for PostingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// External operation-type code.
    pub code: i32,
    /// Posting type the code resolves to.
    pub posting_type: PostingType,
    /// Description shown to operators.
    pub description: String,
}

/// Immutable mapping from external operation-type codes to posting types.
///
/// Built once and handed to the engine at construction; there is no global
/// lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingTypeCatalog {
    entries: BTreeMap<i32, CatalogEntry>,
}

impl PostingTypeCatalog {
    /// Catalog with the four standard operation types (codes 1..=4).
    pub fn standard() -> Self {
        Self::from_entries(PostingType::ALL.iter().map(|t| CatalogEntry {
            code: i32::from(t.code()),
            posting_type: *t,
            description: t.description().to_string(),
        }))
    }

    /// Build a catalog from explicit entries. Later duplicates of a code win.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.code, e)).collect(),
        }
    }

    /// Resolve an operation-type code.
    pub fn resolve(&self, code: i32) -> Option<PostingType> {
        self.entries.get(&code).map(|e| e.posting_type)
    }

    /// Look up the full entry for a code.
    pub fn entry(&self, code: i32) -> Option<&CatalogEntry> {
        self.entries.get(&code)
    }

    /// Iterate entries in code order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PostingTypeCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
