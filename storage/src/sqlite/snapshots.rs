use super::{from_json, missing_row, parse_time, to_json, SqliteStore};
use crate::error::{Result, StorageError};
use crate::models::{NewSnapshot, WorldStateSnapshot};
use crate::store::SnapshotStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

const LATEST_SQL: &str = "SELECT * FROM world_states WHERE conversation_id = ? \
                          ORDER BY message_seq DESC, id DESC LIMIT 1";

fn row_to_snapshot(row: &SqliteRow) -> Result<WorldStateSnapshot> {
    let state: String = row.try_get("state")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(WorldStateSnapshot {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        message_id: row.try_get("message_id")?,
        message_seq: row.try_get("message_seq")?,
        state: from_json(&state)?,
        diff_summary: row.try_get("diff_summary")?,
        created_at: parse_time(&created_at)?,
    })
}

async fn latest_in(
    conn: &mut SqliteConnection,
    conversation_id: &str,
) -> Result<Option<WorldStateSnapshot>> {
    let row = sqlx::query(LATEST_SQL)
        .bind(conversation_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_snapshot).transpose()
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn latest_snapshot(&self, conversation_id: &str) -> Result<Option<WorldStateSnapshot>> {
        let mut conn = self.pool().acquire().await?;
        latest_in(&mut conn, conversation_id).await
    }

    async fn insert_snapshot(
        &self,
        conversation_id: &str,
        snapshot: &NewSnapshot,
    ) -> Result<WorldStateSnapshot> {
        let mut tx = self.pool().begin().await?;

        let seq: Option<(i64,)> =
            sqlx::query_as("SELECT seq FROM messages WHERE id = ? AND conversation_id = ?")
                .bind(snapshot.message_id)
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let message_seq = match seq {
            Some((seq,)) => seq,
            None => {
                return Err(
                    missing_row(&mut *tx, "messages", snapshot.message_id, conversation_id).await,
                )
            }
        };

        let latest = latest_in(&mut *tx, conversation_id).await?;
        if let Some(latest) = &latest {
            if message_seq < latest.message_seq {
                return Err(StorageError::OutOfOrder(format!(
                    "message seq {} precedes latest snapshot at seq {}",
                    message_seq, latest.message_seq
                )));
            }
        }
        let latest_id = latest.as_ref().map(|s| s.id);
        if latest_id != snapshot.previous_id {
            return Err(StorageError::Conflict(format!(
                "snapshot chain moved: expected previous {:?}, found {:?}",
                snapshot.previous_id, latest_id
            )));
        }

        let state = to_json(&snapshot.state)?;
        let result = sqlx::query(
            r#"
            INSERT INTO world_states (conversation_id, message_id, message_seq, state, diff_summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(snapshot.message_id)
        .bind(message_seq)
        .bind(&state)
        .bind(&snapshot.diff_summary)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_state = ? WHERE id = ?")
            .bind(&state)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT * FROM world_states WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let committed = row_to_snapshot(&row)?;
        tx.commit().await?;

        debug!(
            conversation_id = %conversation_id,
            snapshot_id = committed.id,
            message_seq,
            "World state snapshot committed"
        );
        Ok(committed)
    }

    async fn snapshot_at_or_before(
        &self,
        conversation_id: &str,
        seq: i64,
    ) -> Result<Option<WorldStateSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM world_states WHERE conversation_id = ? AND message_seq <= ? \
             ORDER BY message_seq DESC, id DESC LIMIT 1",
        )
        .bind(conversation_id)
        .bind(seq)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn list_snapshots(&self, conversation_id: &str) -> Result<Vec<WorldStateSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM world_states WHERE conversation_id = ? ORDER BY message_seq, id",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_snapshot).collect()
    }
}
