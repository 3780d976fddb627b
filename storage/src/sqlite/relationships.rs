use super::{from_json, parse_time, to_json, SqliteStore};
use crate::error::{Result, StorageError};
use crate::models::RelationshipEdge;
use crate::store::RelationshipStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeSet;
use tracing::debug;

fn row_to_edge(row: &SqliteRow) -> Result<RelationshipEdge> {
    let tags: String = row.try_get("tags")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(RelationshipEdge {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        source: row.try_get("source")?,
        target: row.try_get("target")?,
        value: row.try_get("value")?,
        tags: from_json(&tags)?,
        updated_at: parse_time(&updated_at)?,
        revision: row.try_get("revision")?,
    })
}

#[async_trait]
impl RelationshipStore for SqliteStore {
    async fn apply_relationship_delta(
        &self,
        conversation_id: &str,
        source: &str,
        target: &str,
        delta: i64,
        tags: &BTreeSet<String>,
    ) -> Result<RelationshipEdge> {
        let mut tx = self.pool().begin().await?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!("conversation {}", conversation_id)));
        }

        let current = sqlx::query(
            "SELECT * FROM relationships WHERE conversation_id = ? AND source = ? AND target = ?",
        )
        .bind(conversation_id)
        .bind(source)
        .bind(target)
        .fetch_optional(&mut *tx)
        .await?;
        let current = current.as_ref().map(row_to_edge).transpose()?;

        // Revision is a per-conversation counter so recency ordering never depends on clock resolution.
        let (revision,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM relationships WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        let (value, merged_tags) = match &current {
            Some(edge) => {
                let value = edge.value.checked_add(delta).ok_or_else(|| {
                    StorageError::InvalidValue(format!("relationship value overflow {} -> {}", source, target))
                })?;
                let mut merged = edge.tags.clone();
                merged.extend(tags.iter().cloned());
                (value, merged)
            }
            None => (delta, tags.clone()),
        };
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO relationships (conversation_id, source, target, value, tags, revision, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (conversation_id, source, target) DO UPDATE SET
                value = excluded.value,
                tags = excluded.tags,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(source)
        .bind(target)
        .bind(value)
        .bind(to_json(&merged_tags)?)
        .bind(revision)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM relationships WHERE conversation_id = ? AND source = ? AND target = ?",
        )
        .bind(conversation_id)
        .bind(source)
        .bind(target)
        .fetch_one(&mut *tx)
        .await?;
        let edge = row_to_edge(&row)?;
        tx.commit().await?;

        debug!(
            conversation_id = %conversation_id,
            source = %source,
            target = %target,
            delta,
            value = edge.value,
            "Relationship delta applied"
        );
        Ok(edge)
    }

    async fn relationships_for(
        &self,
        conversation_id: &str,
        entity: &str,
    ) -> Result<Vec<RelationshipEdge>> {
        let rows = sqlx::query(
            "SELECT * FROM relationships WHERE conversation_id = ? AND (source = ? OR target = ?) ORDER BY id",
        )
        .bind(conversation_id)
        .bind(entity)
        .bind(entity)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_edge).collect()
    }
}
