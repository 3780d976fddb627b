use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrative chapter written after a MACRO consolidation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SagaEntry {
    pub id: i64,
    pub conversation_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
