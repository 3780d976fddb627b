//! Behavioral rule fragments. Global registry, not conversation-scoped.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Applicability domain of a rule fragment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    Global,
    /// Bound to the character named by the fragment's scope value.
    Character,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Global => "GLOBAL",
            ScopeType::Character => "CHARACTER",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GLOBAL" => Ok(ScopeType::Global),
            "CHARACTER" => Ok(ScopeType::Character),
            other => Err(StorageError::InvalidValue(format!("scope type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleFragment {
    pub id: i64,
    /// Cleaned content served to the generation pipeline.
    pub content: String,
    /// Raw backup of the content before cleaning.
    pub raw_content: String,
    pub category: String,
    pub scope_type: ScopeType,
    pub scope_value: Option<String>,
    /// The fragment applies only when all of these tags are present in the query.
    pub required_tags: BTreeSet<String>,
    pub summary: String,
    pub source: String,
    pub active: bool,
}

/// Input for the administrative rule import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRuleFragment {
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    pub category: String,
    pub scope_type: ScopeType,
    #[serde(default)]
    pub scope_value: Option<String>,
    #[serde(default)]
    pub required_tags: BTreeSet<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
