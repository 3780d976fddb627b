//! Audit trail of what produced an assistant message. Write-once; never read by engine logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionLog {
    pub id: i64,
    pub conversation_id: String,
    pub message_id: i64,
    pub prompt: String,
    pub context: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInteractionLog {
    pub message_id: i64,
    pub prompt: String,
    pub context: String,
    pub model: String,
}
