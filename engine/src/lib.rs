//! Payledger Settlement Engine
//!
//! Records postings against accounts and settles credits against the
//! oldest outstanding debits first, one store transaction per posting.

pub mod config;
pub mod engine;
pub mod fifo;
pub mod metrics;

pub use config::EngineConfig;
pub use engine::{PostingResult, SettlementEngine};
pub use fifo::{plan_settlement, DebitUpdate, SettlementPlan};
pub use metrics::{EngineMetrics, MetricsSnapshot, SharedMetrics};
