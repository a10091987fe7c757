//! Time utilities and constants.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Timing defaults.
pub mod constants {
    use super::Duration;

    /// Default deadline for one posting transaction (5 seconds).
    pub const POSTING_DEADLINE: Duration = Duration::from_secs(5);

    /// Default wait for the account row lock (2 seconds).
    pub const ACCOUNT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default wait for a pooled connection (5 seconds).
    pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Render a duration as a PostgreSQL interval literal in milliseconds,
/// e.g. `"2000ms"`. Zero disables the corresponding server timeout.
pub fn as_pg_millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}
