//! Metrics collection for engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine metrics.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Postings committed.
    pub postings_recorded: AtomicU64,
    /// Committed credit-class postings.
    pub credits_applied: AtomicU64,
    /// Debit balances changed by settlement.
    pub debits_touched: AtomicU64,
    /// Debits brought to zero by settlement.
    pub debits_settled: AtomicU64,
    /// Failed operations, timeouts included.
    pub failures: AtomicU64,
    /// Deadline or lock wait expirations.
    pub timeouts: AtomicU64,
    /// Accounts created.
    pub accounts_created: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed posting and the settlement it performed.
    pub fn posting_recorded(&self, is_credit: bool, touched: usize, settled: usize) {
        self.postings_recorded.fetch_add(1, Ordering::Relaxed);
        if is_credit {
            self.credits_applied.fetch_add(1, Ordering::Relaxed);
        }
        self.debits_touched.fetch_add(touched as u64, Ordering::Relaxed);
        self.debits_settled.fetch_add(settled as u64, Ordering::Relaxed);
    }

    /// Record a failed operation.
    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timeout. Also counts as a failure.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.failure();
    }

    /// Record account creation.
    pub fn account_created(&self) {
        self.accounts_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            postings_recorded: self.postings_recorded.load(Ordering::Relaxed),
            credits_applied: self.credits_applied.load(Ordering::Relaxed),
            debits_touched: self.debits_touched.load(Ordering::Relaxed),
            debits_settled: self.debits_settled.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            accounts_created: self.accounts_created.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub postings_recorded: u64,
    pub credits_applied: u64,
    pub debits_touched: u64,
    pub debits_settled: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub accounts_created: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<EngineMetrics>;
