//! Memory node model: a summary of raw messages or of lower-tier nodes.
//!
//! Maps to the `memory_nodes` table.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compression tier of a memory node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Summarizes a batch of raw messages.
    Micro,
    /// Summarizes a batch of MICRO nodes.
    Macro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Micro => "MICRO",
            Tier::Macro => "MACRO",
        }
    }

    /// The tier folded into this one, or `None` when the sources are raw messages.
    pub fn lower(&self) -> Option<Tier> {
        match self {
            Tier::Micro => None,
            Tier::Macro => Some(Tier::Micro),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MICRO" => Ok(Tier::Micro),
            "MACRO" => Ok(Tier::Macro),
            other => Err(StorageError::InvalidValue(format!("tier '{}'", other))),
        }
    }
}

/// A persisted memory node. The summary is immutable; `folded` flips false to true once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryNode {
    pub id: i64,
    pub conversation_id: String,
    pub tier: Tier,
    pub summary: String,
    /// Human-readable temporal tag; sorts chronologically as a string.
    pub timeline_anchor: String,
    /// First message sequence number covered (inclusive).
    pub first_seq: i64,
    /// Last message sequence number covered (inclusive).
    pub last_seq: i64,
    pub folded: bool,
    pub vector_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for committing a memory node together with its sources.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemoryNode {
    pub tier: Tier,
    pub summary: String,
    pub timeline_anchor: String,
    pub first_seq: i64,
    pub last_seq: i64,
    pub vector_id: Option<String>,
}
