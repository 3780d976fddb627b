use super::{from_json, parse_time, to_json, SqliteStore};
use crate::error::Result;
use crate::models::Conversation;
use crate::store::ConversationStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
    let created_at: String = row.try_get("created_at")?;
    let last_state: Option<String> = row.try_get("last_state")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        label: row.try_get("label")?,
        created_at: parse_time(&created_at)?,
        last_state: last_state.as_deref().map(from_json).transpose()?,
    })
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        label: &str,
        initial_state: &serde_json::Value,
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
            last_state: Some(initial_state.clone()),
        };
        sqlx::query(
            "INSERT INTO conversations (id, label, created_at, last_state) VALUES (?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.label)
        .bind(conversation.created_at.to_rfc3339())
        .bind(to_json(initial_state)?)
        .execute(self.pool())
        .await?;

        info!(conversation_id = %conversation.id, label = %label, "Conversation created");
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY created_at DESC, id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(self.pool())
            .await?;
        debug!(
            conversation_id = %conversation_id,
            deleted = result.rows_affected(),
            "Conversation delete"
        );
        Ok(result.rows_affected() > 0)
    }
}
