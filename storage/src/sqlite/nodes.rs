use super::{missing_row, parse_time, SqliteStore};
use crate::error::{Result, StorageError};
use crate::models::{MemoryNode, NewMemoryNode, Tier};
use crate::store::MemoryNodeStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

fn row_to_node(row: &SqliteRow) -> Result<MemoryNode> {
    let tier: String = row.try_get("tier")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(MemoryNode {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        tier: tier.parse()?,
        summary: row.try_get("summary")?,
        timeline_anchor: row.try_get("timeline_anchor")?,
        first_seq: row.try_get("first_seq")?,
        last_seq: row.try_get("last_seq")?,
        folded: row.try_get("is_folded")?,
        vector_id: row.try_get("vector_id")?,
        created_at: parse_time(&created_at)?,
    })
}

/// Marks one source consumed. A MICRO node consumes messages, a MACRO node consumes MICRO nodes.
async fn consume_source(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    tier: Tier,
    source_id: i64,
) -> Result<()> {
    let (table, sql) = match tier.lower() {
        None => (
            "messages",
            "UPDATE messages SET is_summarized = 1 \
             WHERE id = ? AND conversation_id = ? AND is_summarized = 0",
        ),
        Some(_) => (
            "memory_nodes",
            "UPDATE memory_nodes SET is_folded = 1 \
             WHERE id = ? AND conversation_id = ? AND tier = 'MICRO' AND is_folded = 0",
        ),
    };

    let result = sqlx::query(sql)
        .bind(source_id)
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 1 {
        return Ok(());
    }

    match missing_row(conn, table, source_id, conversation_id).await {
        StorageError::NotFound(_) => {
            let present: Option<(i64,)> =
                sqlx::query_as(&format!("SELECT id FROM {} WHERE id = ? AND conversation_id = ?", table))
                    .bind(source_id)
                    .bind(conversation_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            match present {
                Some(_) => Err(StorageError::Conflict(format!(
                    "{} {} already consumed",
                    table, source_id
                ))),
                None => Err(StorageError::NotFound(format!(
                    "{} {} in conversation {}",
                    table, source_id, conversation_id
                ))),
            }
        }
        other => Err(other),
    }
}

#[async_trait]
impl MemoryNodeStore for SqliteStore {
    async fn commit_node(
        &self,
        conversation_id: &str,
        node: &NewMemoryNode,
        source_ids: &[i64],
    ) -> Result<MemoryNode> {
        if source_ids.is_empty() {
            return Err(StorageError::InvalidValue(
                "memory node needs at least one source".to_string(),
            ));
        }

        let mut tx = self.pool().begin().await?;
        for source_id in source_ids {
            // Dropping the transaction on error rolls back the sources consumed so far.
            consume_source(&mut *tx, conversation_id, node.tier, *source_id).await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO memory_nodes
                (conversation_id, tier, summary, timeline_anchor, first_seq, last_seq, is_folded, vector_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(node.tier.as_str())
        .bind(&node.summary)
        .bind(&node.timeline_anchor)
        .bind(node.first_seq)
        .bind(node.last_seq)
        .bind(&node.vector_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM memory_nodes WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let committed = row_to_node(&row)?;
        tx.commit().await?;

        info!(
            conversation_id = %conversation_id,
            node_id = committed.id,
            tier = %committed.tier,
            sources = source_ids.len(),
            anchor = %committed.timeline_anchor,
            "Memory node committed"
        );
        Ok(committed)
    }

    async fn unfolded_nodes(&self, conversation_id: &str, tier: Tier) -> Result<Vec<MemoryNode>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_nodes WHERE conversation_id = ? AND tier = ? AND is_folded = 0 ORDER BY id",
        )
        .bind(conversation_id)
        .bind(tier.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn latest_node(&self, conversation_id: &str, tier: Tier) -> Result<Option<MemoryNode>> {
        let row = sqlx::query(
            "SELECT * FROM memory_nodes WHERE conversation_id = ? AND tier = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(conversation_id)
        .bind(tier.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn list_nodes(&self, conversation_id: &str) -> Result<Vec<MemoryNode>> {
        let rows = sqlx::query("SELECT * FROM memory_nodes WHERE conversation_id = ? ORDER BY id")
            .bind(conversation_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn nodes_in_range(
        &self,
        conversation_id: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<MemoryNode>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM memory_nodes
            WHERE conversation_id = ?
              AND (? IS NULL OR timeline_anchor >= ?)
              AND (? IS NULL OR timeline_anchor <= ?)
            ORDER BY timeline_anchor, id
            "#,
        )
        .bind(conversation_id)
        .bind(from)
        .bind(from)
        .bind(to)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn nodes_missing_vector(&self, conversation_id: &str) -> Result<Vec<MemoryNode>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_nodes WHERE conversation_id = ? AND vector_id IS NULL ORDER BY id",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn set_node_vector(
        &self,
        conversation_id: &str,
        node_id: i64,
        vector_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE memory_nodes SET vector_id = ? WHERE id = ? AND conversation_id = ?",
        )
        .bind(vector_id)
        .bind(node_id)
        .bind(conversation_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            let mut conn = self.pool().acquire().await?;
            return Err(missing_row(&mut *conn, "memory_nodes", node_id, conversation_id).await);
        }
        debug!(conversation_id = %conversation_id, node_id, "Vector id attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use crate::models::{NewMessage, Role};
    use crate::store::{ConversationStore, MessageStore};
    use serde_json::json;

    fn micro(first_seq: i64, last_seq: i64, anchor: &str) -> NewMemoryNode {
        NewMemoryNode {
            tier: Tier::Micro,
            summary: format!("summary {}-{}", first_seq, last_seq),
            timeline_anchor: anchor.to_string(),
            first_seq,
            last_seq,
            vector_id: None,
        }
    }

    async fn seed_messages(store: &SqliteStore, conversation_id: &str, n: usize) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 0..n {
            let msg = store
                .append_message(conversation_id, &NewMessage::new(Role::User, format!("m{}", i), vec![]))
                .await
                .unwrap();
            ids.push(msg.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_commit_micro_marks_messages_summarized() {
        let (store, _dir) = temp_store().await;
        let conv = store.create_conversation("a", &json!({})).await.unwrap();
        let ids = seed_messages(&store, &conv.id, 6).await;

        let node = store
            .commit_node(&conv.id, &micro(1, 5, "t5"), &ids[..5])
            .await
            .unwrap();
        assert_eq!(node.tier, Tier::Micro);
        assert!(!node.folded);

        let pending = store.unsummarized_messages(&conv.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[5]);
    }

    #[tokio::test]
    async fn test_commit_rejects_consumed_source_without_writing() {
        let (store, _dir) = temp_store().await;
        let conv = store.create_conversation("a", &json!({})).await.unwrap();
        let ids = seed_messages(&store, &conv.id, 3).await;

        store.commit_node(&conv.id, &micro(1, 1, "t1"), &ids[..1]).await.unwrap();
        let err = store
            .commit_node(&conv.id, &micro(2, 3, "t3"), &[ids[1], ids[0]])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // ids[1] must still be pending: the failed commit rolled back.
        let pending = store.unsummarized_messages(&conv.id).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(store.list_nodes(&conv.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_sources() {
        let (store, _dir) = temp_store().await;
        let a = store.create_conversation("a", &json!({})).await.unwrap();
        let b = store.create_conversation("b", &json!({})).await.unwrap();
        let foreign = seed_messages(&store, &b.id, 1).await;

        let err = store
            .commit_node(&a.id, &micro(1, 1, "t1"), &foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CrossConversation(_)));
        assert_eq!(store.unsummarized_messages(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_macro_folds_micro_nodes() {
        let (store, _dir) = temp_store().await;
        let conv = store.create_conversation("a", &json!({})).await.unwrap();
        let ids = seed_messages(&store, &conv.id, 2).await;
        let m1 = store.commit_node(&conv.id, &micro(1, 1, "t1"), &ids[..1]).await.unwrap();
        let m2 = store.commit_node(&conv.id, &micro(2, 2, "t2"), &ids[1..]).await.unwrap();

        let macro_node = NewMemoryNode {
            tier: Tier::Macro,
            summary: "chapter".to_string(),
            timeline_anchor: "t2".to_string(),
            first_seq: 1,
            last_seq: 2,
            vector_id: Some("vec-1".to_string()),
        };
        store.commit_node(&conv.id, &macro_node, &[m1.id, m2.id]).await.unwrap();

        assert!(store.unfolded_nodes(&conv.id, Tier::Micro).await.unwrap().is_empty());
        let latest = store.latest_node(&conv.id, Tier::Macro).await.unwrap().unwrap();
        assert_eq!(latest.vector_id.as_deref(), Some("vec-1"));
    }

    #[tokio::test]
    async fn test_range_and_vector_backfill() {
        let (store, _dir) = temp_store().await;
        let conv = store.create_conversation("a", &json!({})).await.unwrap();
        let ids = seed_messages(&store, &conv.id, 3).await;
        for (i, id) in ids.iter().enumerate() {
            let anchor = format!("2024-01-0{} 00:00:00.000", i + 1);
            store
                .commit_node(&conv.id, &micro(i as i64 + 1, i as i64 + 1, &anchor), &[*id])
                .await
                .unwrap();
        }

        let ranged = store
            .nodes_in_range(&conv.id, Some("2024-01-02 00:00:00.000"), None)
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
        let all = store.nodes_in_range(&conv.id, None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let missing = store.nodes_missing_vector(&conv.id).await.unwrap();
        assert_eq!(missing.len(), 3);
        store.set_node_vector(&conv.id, missing[0].id, "vec-9").await.unwrap();
        assert_eq!(store.nodes_missing_vector(&conv.id).await.unwrap().len(), 2);
    }
}
