//! Engine-wide configuration loaded from environment variables at
//! startup. Grounded on `Config::from_env`, trimmed to the settings an
//! embedded library needs (no CORS/session/email fields, since the HTTP
//! layer those configured is out of scope here).

use std::time::Duration;

/// Configuration loaded from environment variables at startup.
pub struct EngineConfig {
    pub database_url: String,
    /// How often the Timer Service sweeps active rounds.
    pub tick_interval: Duration,
    /// Hard deadline for a single storage transaction. Exceeding it
    /// surfaces `EngineError::Timeout` rather than hanging a bid or
    /// round-completion task indefinitely.
    pub storage_timeout: Duration,
    /// Hard deadline for acquiring an auction's `bid-lock:{auctionId}`.
    pub lock_timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        use std::env::var;

        fn millis(key: &str, default: u64) -> Duration {
            Duration::from_millis(var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
        }

        EngineConfig {
            database_url: var("DATABASE_URL").expect("DATABASE_URL must be set"),
            tick_interval: millis("TICK_INTERVAL_MS", 1000),
            storage_timeout: millis("STORAGE_TIMEOUT_MS", 5000),
            lock_timeout: millis("LOCK_TIMEOUT_MS", 2000),
        }
    }
}
