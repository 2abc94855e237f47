//! Process-wide defaults resolved from the environment.
//!
//! Crawl documents can override most of these per crawler; anything they
//! leave out falls back to the values here. Resolution reads `.env` (via
//! dotenvy) once and then plain environment variables, mirroring how the
//! rest of the crate treats configuration: resolved at startup, immutable
//! afterwards.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the sqlite database file or URL.
pub const ENV_DATABASE_URL: &str = "SPINNERET_DATABASE_URL";
/// Environment variable for the default incremental-crawl flag.
pub const ENV_INCREMENTAL: &str = "SPINNERET_INCREMENTAL";
/// Environment variable for the default queue expiry, in days.
pub const ENV_EXPIRE_DAYS: &str = "SPINNERET_EXPIRE_DAYS";
/// Environment variable for the blob store root directory.
pub const ENV_DATA_PATH: &str = "SPINNERET_DATA_PATH";

/// Process-wide defaults for crawler execution.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Default for a run's incremental flag when `run()` is not given one.
    pub incremental: bool,
    /// Default queue-item expiry in days; crawl documents override via
    /// their `expire` key.
    pub expire_days: u64,
    /// Root directory of the content-addressed blob store.
    pub data_path: PathBuf,
    /// Database URL for the sqlite backend.
    pub database_url: String,
    /// How long an idle worker sleeps between queue polls.
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Settings {
    /// Resolve settings from `.env` and the process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            incremental: env_bool(ENV_INCREMENTAL, false),
            expire_days: std::env::var(ENV_EXPIRE_DAYS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            data_path: std::env::var(ENV_DATA_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            database_url: std::env::var(ENV_DATABASE_URL)
                .unwrap_or_else(|_| "sqlite://spinneret.db".to_string()),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Default queue-item expiry in seconds.
    #[must_use]
    pub fn expire_seconds(&self) -> u64 {
        self.expire_days * 86_400
    }

    #[must_use]
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    #[must_use]
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_scales_days_to_seconds() {
        let settings = Settings {
            incremental: false,
            expire_days: 2,
            data_path: PathBuf::from("data"),
            database_url: String::new(),
            poll_interval: Duration::from_millis(250),
        };
        assert_eq!(settings.expire_seconds(), 172_800);
    }
}
