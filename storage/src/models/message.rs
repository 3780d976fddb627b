//! Message model for persistence.
//!
//! Maps to the `messages` table. Immutable once written except for the summarized flag.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(StorageError::InvalidValue(format!("role '{}'", other))),
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: String,
    /// Monotonically increasing position within the conversation, starting at 1.
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub tags: Vec<String>,
    /// Set once the message has been folded into a MICRO memory node.
    pub summarized: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a message; id and sequence are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Creates a message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tags,
            created_at: Utc::now(),
        }
    }
}
