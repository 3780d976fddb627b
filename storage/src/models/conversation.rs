//! Conversation model: one per session.
//!
//! Maps to the `conversations` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Cached serialized world state for fast resume. Not authoritative:
    /// snapshot history wins whenever both exist.
    pub last_state: Option<serde_json::Value>,
}
