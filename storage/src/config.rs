//! Store configuration loaded from the environment.

use std::env;

/// Default SQLite file used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "./tavern.db";

/// Connection settings for [`SqliteStore`](crate::SqliteStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite file path, or `:memory:` for a private in-memory database.
    pub database_url: String,
    /// Pool size. SQLite has a single writer, so the default is one connection.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 1,
        }
    }
}

impl StoreConfig {
    /// Config for the given database path with default pool settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables (`DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`).
    pub fn from_env() -> Self {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);
        Self {
            database_url,
            max_connections,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.database_url.as_str(), ":memory:" | "sqlite::memory:")
    }
}
