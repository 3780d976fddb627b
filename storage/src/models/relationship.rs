//! Relationship edge between two entities of a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Directed affinity edge, unique per (conversation, source, target).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipEdge {
    pub id: i64,
    pub conversation_id: String,
    pub source: String,
    pub target: String,
    /// Accumulated affinity; every update adds to it.
    pub value: i64,
    pub tags: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    /// Per-conversation update counter; higher means more recently updated.
    pub revision: i64,
}
