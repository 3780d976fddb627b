use super::{from_json, missing_row, parse_time, to_json, SqliteStore};
use crate::error::{Result, StorageError};
use crate::models::{MessageRecord, NewMessage};
use crate::store::MessageStore;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

pub(super) fn row_to_message(row: &SqliteRow) -> Result<MessageRecord> {
    let role: String = row.try_get("role")?;
    let tags: String = row.try_get("tags")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        seq: row.try_get("seq")?,
        role: role.parse()?,
        content: row.try_get("content")?,
        tags: from_json(&tags)?,
        summarized: row.try_get("is_summarized")?,
        created_at: parse_time(&created_at)?,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &NewMessage,
    ) -> Result<MessageRecord> {
        let mut tx = self.pool().begin().await?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!("conversation {}", conversation_id)));
        }

        // Sequence assignment and insert are one statement, so concurrent appends cannot share a seq.
        let result = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, seq, role, content, tags, is_summarized, created_at)
            SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, 0, ?
            FROM messages WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(to_json(&message.tags)?)
        .bind(message.created_at.to_rfc3339())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let record = row_to_message(&row)?;
        tx.commit().await?;

        debug!(
            conversation_id = %conversation_id,
            message_id = record.id,
            seq = record.seq,
            "Message appended"
        );
        Ok(record)
    }

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: i64,
    ) -> Result<Option<MessageRecord>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ? AND conversation_id = ?")
            .bind(message_id)
            .bind(conversation_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn unsummarized_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? AND is_summarized = 0 ORDER BY seq",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY seq LIMIT ? OFFSET ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn truncate_after(
        &self,
        conversation_id: &str,
        message_id: i64,
        state: &serde_json::Value,
    ) -> Result<u64> {
        let mut tx = self.pool().begin().await?;

        let seq: Option<(i64,)> =
            sqlx::query_as("SELECT seq FROM messages WHERE id = ? AND conversation_id = ?")
                .bind(message_id)
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((seq,)) = seq else {
            return Err(missing_row(&mut *tx, "messages", message_id, conversation_id).await);
        };

        let (covering,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM memory_nodes WHERE conversation_id = ? AND last_seq > ?",
        )
        .bind(conversation_id)
        .bind(seq)
        .fetch_one(&mut *tx)
        .await?;
        if covering > 0 {
            return Err(StorageError::Conflict(format!(
                "{} memory nodes cover messages after seq {} in conversation {}",
                covering, seq, conversation_id
            )));
        }

        sqlx::query("DELETE FROM world_states WHERE conversation_id = ? AND message_seq > ?")
            .bind(conversation_id)
            .bind(seq)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            DELETE FROM interaction_logs WHERE conversation_id = ? AND message_id IN
                (SELECT id FROM messages WHERE conversation_id = ? AND seq > ?)
            "#,
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(seq)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM messages WHERE conversation_id = ? AND seq > ?")
            .bind(conversation_id)
            .bind(seq)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("UPDATE conversations SET last_state = ? WHERE id = ?")
            .bind(to_json(state)?)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(conversation_id = %conversation_id, seq, deleted, "Messages truncated");
        Ok(deleted)
    }
}
