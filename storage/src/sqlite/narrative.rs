//! Saga chapters, lore entries and interaction logs.

use super::{missing_row, parse_time, SqliteStore};
use crate::error::{map_unique, Result, StorageError};
use crate::models::{InteractionLog, LoreEntry, NewInteractionLog, NewLoreEntry, SagaEntry};
use crate::store::NarrativeStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

fn row_to_saga(row: &SqliteRow) -> Result<SagaEntry> {
    let created_at: String = row.try_get("created_at")?;
    Ok(SagaEntry {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: parse_time(&created_at)?,
    })
}

fn row_to_lore(row: &SqliteRow) -> Result<LoreEntry> {
    let source: String = row.try_get("source")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(LoreEntry {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        keyword: row.try_get("keyword")?,
        content: row.try_get("content")?,
        source: source.parse()?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn row_to_log(row: &SqliteRow) -> Result<InteractionLog> {
    let created_at: String = row.try_get("created_at")?;
    Ok(InteractionLog {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        message_id: row.try_get("message_id")?,
        prompt: row.try_get("prompt")?,
        context: row.try_get("context")?,
        model: row.try_get("model")?,
        created_at: parse_time(&created_at)?,
    })
}

impl SqliteStore {
    async fn lore_by_keyword(&self, conversation_id: &str, keyword: &str) -> Result<LoreEntry> {
        let row = sqlx::query("SELECT * FROM lore_entries WHERE conversation_id = ? AND keyword = ?")
            .bind(conversation_id)
            .bind(keyword)
            .fetch_one(self.pool())
            .await?;
        row_to_lore(&row)
    }
}

#[async_trait]
impl NarrativeStore for SqliteStore {
    async fn append_saga(
        &self,
        conversation_id: &str,
        title: &str,
        content: &str,
    ) -> Result<SagaEntry> {
        let result = sqlx::query(
            "INSERT INTO saga_entries (conversation_id, title, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(title)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        let row = sqlx::query("SELECT * FROM saga_entries WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(self.pool())
            .await?;
        row_to_saga(&row)
    }

    async fn list_saga(&self, conversation_id: &str) -> Result<Vec<SagaEntry>> {
        let rows = sqlx::query("SELECT * FROM saga_entries WHERE conversation_id = ? ORDER BY id")
            .bind(conversation_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_saga).collect()
    }

    async fn insert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> Result<LoreEntry> {
        sqlx::query(
            "INSERT INTO lore_entries (conversation_id, keyword, content, source, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(&entry.keyword)
        .bind(&entry.content)
        .bind(entry.source.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, || StorageError::DuplicateKeyword(entry.keyword.clone())))?;

        self.lore_by_keyword(conversation_id, &entry.keyword).await
    }

    async fn upsert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> Result<LoreEntry> {
        sqlx::query(
            r#"
            INSERT INTO lore_entries (conversation_id, keyword, content, source, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (conversation_id, keyword) DO UPDATE SET
                content = excluded.content,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(&entry.keyword)
        .bind(&entry.content)
        .bind(entry.source.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        debug!(conversation_id = %conversation_id, keyword = %entry.keyword, "Lore upserted");
        self.lore_by_keyword(conversation_id, &entry.keyword).await
    }

    async fn get_lore(&self, conversation_id: &str, keyword: &str) -> Result<Option<LoreEntry>> {
        let row = sqlx::query("SELECT * FROM lore_entries WHERE conversation_id = ? AND keyword = ?")
            .bind(conversation_id)
            .bind(keyword)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_lore).transpose()
    }

    async fn list_lore(&self, conversation_id: &str) -> Result<Vec<LoreEntry>> {
        let rows = sqlx::query("SELECT * FROM lore_entries WHERE conversation_id = ? ORDER BY keyword")
            .bind(conversation_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_lore).collect()
    }

    async fn log_interaction(
        &self,
        conversation_id: &str,
        log: &NewInteractionLog,
    ) -> Result<InteractionLog> {
        let mut tx = self.pool().begin().await?;

        let owned: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM messages WHERE id = ? AND conversation_id = ?")
                .bind(log.message_id)
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Err(missing_row(&mut *tx, "messages", log.message_id, conversation_id).await);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO interaction_logs (conversation_id, message_id, prompt, context, model, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(log.message_id)
        .bind(&log.prompt)
        .bind(&log.context)
        .bind(&log.model)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM interaction_logs WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let entry = row_to_log(&row)?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn interaction_logs(&self, conversation_id: &str) -> Result<Vec<InteractionLog>> {
        let rows = sqlx::query("SELECT * FROM interaction_logs WHERE conversation_id = ? ORDER BY id")
            .bind(conversation_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_log).collect()
    }
}
