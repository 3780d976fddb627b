//! World facts keyed by a keyword unique within a conversation.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a lore entry came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoreSource {
    Generated,
    External,
}

impl LoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoreSource::Generated => "generated",
            LoreSource::External => "external",
        }
    }
}

impl FromStr for LoreSource {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(LoreSource::Generated),
            "external" => Ok(LoreSource::External),
            other => Err(StorageError::InvalidValue(format!("lore source '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoreEntry {
    pub id: i64,
    pub conversation_id: String,
    pub keyword: String,
    pub content: String,
    pub source: LoreSource,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLoreEntry {
    pub keyword: String,
    pub content: String,
    pub source: LoreSource,
}
