//! Engine configuration.

use std::time::Duration;

use payledger_common::constants::{ACCOUNT_LOCK_TIMEOUT, POOL_ACQUIRE_TIMEOUT, POSTING_DEADLINE};
use payledger_common::PostingTypeCatalog;

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Node ID used in logs. Generated at startup when unset.
    pub node_id: Option<String>,
    /// Database URL.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Default deadline for one posting transaction.
    pub posting_deadline: Duration,
    /// How long a posting waits for the account lock.
    pub lock_timeout: Duration,
    /// Apply schema migrations at startup.
    pub run_migrations: bool,
    /// Log level.
    pub log_level: String,
    /// Operation-type catalog used to resolve external codes.
    pub catalog: PostingTypeCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            database_url: "postgres://localhost/payledger".to_string(),
            max_connections: 10,
            acquire_timeout: POOL_ACQUIRE_TIMEOUT,
            posting_deadline: POSTING_DEADLINE,
            lock_timeout: ACCOUNT_LOCK_TIMEOUT,
            run_migrations: true,
            log_level: "info".to_string(),
            catalog: PostingTypeCatalog::standard(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("NODE_ID") {
            config.node_id = Some(id);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(max) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.max_connections = max;
            }
        }

        if let Some(deadline) = env_millis("POSTING_DEADLINE_MS") {
            config.posting_deadline = deadline;
        }

        if let Some(timeout) = env_millis("ACCOUNT_LOCK_TIMEOUT_MS") {
            config.lock_timeout = timeout;
        }

        if let Ok(flag) = std::env::var("RUN_MIGRATIONS") {
            config.run_migrations = !matches!(flag.trim(), "0" | "false" | "no" | "off");
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Max connections cannot be 0".to_string());
        }

        if self.posting_deadline.is_zero() {
            return Err("Posting deadline cannot be 0".to_string());
        }

        if self.lock_timeout > self.posting_deadline {
            return Err("Account lock timeout cannot exceed posting deadline".to_string());
        }

        Ok(())
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
