//! World-state snapshot taken after a message. Append-only rollback timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldStateSnapshot {
    pub id: i64,
    pub conversation_id: String,
    pub message_id: i64,
    /// Sequence of the referenced message; snapshots are ordered by it.
    pub message_seq: i64,
    pub state: serde_json::Value,
    pub diff_summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub message_id: i64,
    pub state: serde_json::Value,
    pub diff_summary: String,
    /// Id of the snapshot the diff was computed against. The insert is rejected
    /// with a conflict if another snapshot was committed in between.
    pub previous_id: Option<i64>,
}
