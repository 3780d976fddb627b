//! # World-state snapshots
//!
//! Every committed snapshot references the message it was taken after and stores
//! the full state plus a diff against its predecessor. Snapshots ordered by
//! message sequence form the rollback timeline; rollback only reads it.

use crate::diff::diff_summary;
use crate::error::{EngineError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tavern_storage::{NewSnapshot, Store, WorldStateSnapshot};
use tracing::{debug, info};

#[derive(Clone)]
pub struct Snapshotter {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl Snapshotter {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Persists `state` as the snapshot after `message_id`.
    ///
    /// An attempt that exceeds the snapshot timeout is abandoned with nothing written.
    pub async fn commit(
        &self,
        conversation_id: &str,
        message_id: i64,
        state: Value,
    ) -> Result<WorldStateSnapshot> {
        tokio::time::timeout(self.timeout, self.commit_inner(conversation_id, message_id, state))
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }

    async fn commit_inner(
        &self,
        conversation_id: &str,
        message_id: i64,
        state: Value,
    ) -> Result<WorldStateSnapshot> {
        let previous = self.store.latest_snapshot(conversation_id).await?;
        let diff = diff_summary(previous.as_ref().map(|s| &s.state), &state);
        let snapshot = NewSnapshot {
            message_id,
            state,
            diff_summary: diff,
            previous_id: previous.as_ref().map(|s| s.id),
        };
        let committed = self.store.insert_snapshot(conversation_id, &snapshot).await?;
        info!(
            conversation_id = %conversation_id,
            snapshot_id = committed.id,
            message_seq = committed.message_seq,
            "Snapshot committed"
        );
        Ok(committed)
    }

    /// State committed at or immediately before `message_id`.
    ///
    /// Unknown messages, messages of other conversations and messages that precede
    /// every snapshot are consistency errors; no nearest match is substituted.
    pub async fn rollback(&self, conversation_id: &str, message_id: i64) -> Result<Value> {
        let message = self
            .store
            .get_message(conversation_id, message_id)
            .await?
            .ok_or_else(|| {
                EngineError::Consistency(format!(
                    "message {} does not exist in conversation {}",
                    message_id, conversation_id
                ))
            })?;

        let snapshot = self
            .store
            .snapshot_at_or_before(conversation_id, message.seq)
            .await?
            .ok_or_else(|| {
                EngineError::Consistency(format!(
                    "no snapshot at or before message {} (seq {})",
                    message_id, message.seq
                ))
            })?;

        debug!(
            conversation_id = %conversation_id,
            message_id,
            snapshot_id = snapshot.id,
            "Rollback resolved"
        );
        Ok(snapshot.state)
    }

    /// Latest committed state. The conversation's cached state is used only when no
    /// snapshot exists yet.
    pub async fn current_state(&self, conversation_id: &str) -> Result<Value> {
        if let Some(latest) = self.store.latest_snapshot(conversation_id).await? {
            return Ok(latest.state);
        }
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                EngineError::Consistency(format!("conversation {} does not exist", conversation_id))
            })?;
        Ok(conversation.last_state.unwrap_or(Value::Null))
    }
}
