//! # SQLite Store
//!
//! [`SqliteStore`] implements every [`Store`](crate::Store) sub-trait on one sqlx pool.
//! Each entity lives in its own module; this module owns construction, schema
//! initialisation and the shared row helpers.
//!
//! Multi-row writes (committing a node and consuming its sources, a snapshot and
//! the state cache) run in a single transaction.

mod conversations;
mod messages;
mod narrative;
mod nodes;
mod relationships;
mod rules;
mod schema;
mod snapshots;

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::sqlite_pool::SqlitePoolManager;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

/// SQLite-backed store for all conversation state and the rule registry.
#[derive(Clone)]
pub struct SqliteStore {
    pool_manager: SqlitePoolManager,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and ensures the schema exists.
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let pool_manager = SqlitePoolManager::new(config).await?;
        let store = Self { pool_manager };
        store.init().await?;
        Ok(store)
    }

    /// Opens the database file at `path` with default pool settings.
    pub async fn open(path: &str) -> Result<Self> {
        Self::new(&StoreConfig::new(path)).await
    }

    async fn init(&self) -> Result<()> {
        info!("Creating database tables if not exist");
        sqlx::query(schema::SCHEMA).execute(self.pool()).await?;
        info!("Database tables created successfully");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.pool_manager.pool()
    }
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidValue(format!("timestamp '{}': {}", text, e)))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

/// Explains why `id` was not found in `table` for `conversation_id`: it either
/// belongs to another conversation or does not exist at all.
pub(crate) async fn missing_row(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
    conversation_id: &str,
) -> StorageError {
    let owner: std::result::Result<Option<(String,)>, sqlx::Error> =
        sqlx::query_as(&format!("SELECT conversation_id FROM {} WHERE id = ?", table))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await;
    match owner {
        Ok(Some((other,))) if other != conversation_id => StorageError::CrossConversation(
            format!("{} {} belongs to conversation {}", table, id, other),
        ),
        Ok(_) => StorageError::NotFound(format!("{} {} in conversation {}", table, id, conversation_id)),
        Err(e) => StorageError::Database(e),
    }
}
