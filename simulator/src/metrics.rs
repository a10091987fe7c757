//! Simulation metrics: posting mix, failures by error code, latency.

use std::collections::BTreeMap;
use std::time::Duration;

use payledger_common::{LedgerError, PostingClass};

/// Outcome counters for one simulator run.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    /// Committed debit-class postings.
    pub debits_posted: u64,
    /// Committed credit-class postings.
    pub credits_posted: u64,
    /// Rejected postings keyed by `LedgerError::error_code`.
    pub failures: BTreeMap<&'static str, u64>,
    latencies: Vec<Duration>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed posting of `class`.
    pub fn record_posted(&mut self, class: PostingClass, latency: Duration) {
        match class {
            PostingClass::Debit => self.debits_posted += 1,
            PostingClass::Credit => self.credits_posted += 1,
        }
        self.latencies.push(latency);
    }

    /// Record a rejected posting.
    pub fn record_failed(&mut self, err: &LedgerError) {
        *self.failures.entry(err.error_code()).or_insert(0) += 1;
    }

    pub fn posted(&self) -> u64 {
        self.debits_posted + self.credits_posted
    }

    pub fn failed(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn timed_out(&self) -> u64 {
        self.failures.get("TIMEOUT").copied().unwrap_or(0)
    }

    pub fn attempted(&self) -> u64 {
        self.posted() + self.failed()
    }

    /// Share of committed postings that were credits.
    pub fn credit_share(&self) -> f64 {
        match self.posted() {
            0 => 0.0,
            n => self.credits_posted as f64 / n as f64,
        }
    }

    /// Nearest-rank latency percentile of committed postings.
    pub fn latency_percentile(&self, percentile: u32) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();

        let rank = (sorted.len() * percentile.min(100) as usize).div_ceil(100);
        sorted[rank.saturating_sub(1)]
    }

    /// Committed postings per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.posted() as f64 / secs
    }
}
