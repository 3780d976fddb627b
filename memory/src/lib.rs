//! # Tavern Memory
//!
//! Memory consolidation and world-state versioning for long-running
//! conversations: raw turns are folded into tiered memory nodes, relationship
//! deltas accumulate in a per-conversation graph, and every message gets a
//! world-state snapshot that rollback can return to.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tavern_generation::Offline;
//! use tavern_memory::{AppendMessage, EngineConfig, SessionCoordinator};
//! use tavern_storage::{Role, SqliteStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open("./tavern.db").await?);
//! let engine = SessionCoordinator::new(store, Arc::new(Offline), Arc::new(Offline), EngineConfig::default());
//!
//! let conversation = engine.create_conversation("tavern", serde_json::json!({"day": 1})).await?;
//! let message_id = engine
//!     .append_message(&conversation.id, AppendMessage::new(Role::User, "I open the door."))
//!     .await?;
//! engine.wait_idle().await;
//! let state = engine.rollback_to(&conversation.id, message_id).await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`session`] - SessionCoordinator, the public contract
//! - [`consolidator`] - MICRO/MACRO folding state machine
//! - [`snapshot`] - World-state snapshots and rollback
//! - [`graph`] - Relationship graph
//! - [`rules`] - Rule resolution by scope and tags
//! - [`extract`] - Relationship deltas embedded in merge summaries
//! - [`diff`] - World-state diff summaries
//! - [`timeline`] - Timeline tags and time ranges
//! - [`config`] - EngineConfig
//! - [`error`] - EngineError
//!
//! ## External Interactions
//!
//! - **Store**: `tavern_storage::Store`, shared by all conversations
//! - **Summarizer / Embedder**: `tavern_generation` traits; failures defer work, never fail a call

pub mod config;
pub mod consolidator;
pub mod diff;
pub mod error;
pub mod extract;
pub mod graph;
pub mod rules;
pub mod session;
pub mod snapshot;
pub mod timeline;

mod locks;
mod queue;


pub use config::EngineConfig;
pub use consolidator::{ConsolidationOutcome, ConsolidationState};
pub use error::{EngineError, Result};
pub use extract::{parse_merge_output, MergeOutput, RelationshipDelta};
pub use graph::RelationshipGraph;
pub use rules::{group_by_category, RuleResolver};
pub use session::{AppendMessage, SessionCoordinator, EMPTY_SPINE};
pub use snapshot::Snapshotter;
pub use timeline::{timeline_tag, TimeRange};
