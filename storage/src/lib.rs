//! Storage crate: conversation-scoped persistence for the memory engine.
//!
//! ## Modules
//!
//! - [`error`] – Storage error types
//! - [`models`] – Conversations, messages, memory nodes, relationships, snapshots, rules
//! - [`store`] – Store traits split by entity, combined in [`Store`]
//! - [`sqlite`] – SqliteStore, the SQLite implementation
//! - [`sqlite_pool`] – SqlitePoolManager
//! - [`config`] – StoreConfig

mod config;
mod error;
mod models;
mod sqlite;
mod sqlite_pool;
mod store;

pub use config::{StoreConfig, DEFAULT_DATABASE_URL};
pub use error::{Result, StorageError};
pub use models::{
    Conversation, InteractionLog, LoreEntry, LoreSource, MemoryNode, MessageRecord,
    NewInteractionLog, NewLoreEntry, NewMemoryNode, NewMessage, NewRuleFragment, NewSnapshot,
    RelationshipEdge, Role, RuleFragment, SagaEntry, ScopeType, Tier, WorldStateSnapshot,
};
pub use sqlite::SqliteStore;
pub use sqlite_pool::SqlitePoolManager;
pub use store::{
    ConversationStore, MemoryNodeStore, MessageStore, NarrativeStore, RelationshipStore,
    RuleStore, SnapshotStore, Store,
};
