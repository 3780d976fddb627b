//! # Store
//!
//! Storage interface required by the engine, split by entity so each backend
//! implementation stays readable. [`Store`] is the union and is what callers hold
//! (`Arc<dyn Store>`).
//!
//! Every conversation-owned operation takes the conversation id and only ever
//! touches that conversation's rows. Writes that reference rows of another
//! conversation fail with [`StorageError::CrossConversation`](crate::StorageError).

use crate::error::Result;
use crate::models::{
    Conversation, InteractionLog, LoreEntry, MemoryNode, MessageRecord, NewInteractionLog,
    NewLoreEntry, NewMemoryNode, NewMessage, NewRuleFragment, NewSnapshot, RelationshipEdge,
    RuleFragment, SagaEntry, Tier, WorldStateSnapshot,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates a conversation with a generated UUID; `initial_state` seeds the state cache.
    async fn create_conversation(
        &self,
        label: &str,
        initial_state: &serde_json::Value,
    ) -> Result<Conversation>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// All conversations, newest first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Deletes the conversation and every row that references it. Returns false if absent.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts a message with the next sequence number of its conversation.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &NewMessage,
    ) -> Result<MessageRecord>;

    /// Looks a message up within one conversation; messages of other conversations are invisible.
    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: i64,
    ) -> Result<Option<MessageRecord>>;

    /// Messages not yet folded into a MICRO node, in sequence order.
    async fn unsummarized_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>>;

    /// Messages in sequence order, paged.
    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<MessageRecord>>;

    /// Deletes every message after `message_id` with its snapshots and interaction
    /// logs, and resets the state cache to `state`, in one transaction. Returns the
    /// number of messages deleted.
    ///
    /// Fails with [`Conflict`](crate::StorageError::Conflict) without writing if a
    /// memory node covers one of the messages to delete.
    async fn truncate_after(
        &self,
        conversation_id: &str,
        message_id: i64,
        state: &serde_json::Value,
    ) -> Result<u64>;
}

#[async_trait]
pub trait MemoryNodeStore: Send + Sync {
    /// Atomically inserts `node` and marks its sources consumed: messages become
    /// summarized for a MICRO node, lower-tier nodes become folded otherwise.
    ///
    /// Fails without writing anything if a source belongs to another conversation
    /// ([`CrossConversation`](crate::StorageError::CrossConversation)) or was already
    /// consumed ([`Conflict`](crate::StorageError::Conflict)).
    async fn commit_node(
        &self,
        conversation_id: &str,
        node: &NewMemoryNode,
        source_ids: &[i64],
    ) -> Result<MemoryNode>;

    /// Nodes of `tier` whose folded flag is still false, in creation order.
    async fn unfolded_nodes(&self, conversation_id: &str, tier: Tier) -> Result<Vec<MemoryNode>>;

    /// Most recently created node of `tier`.
    async fn latest_node(&self, conversation_id: &str, tier: Tier) -> Result<Option<MemoryNode>>;

    /// Every node of the conversation, in creation order.
    async fn list_nodes(&self, conversation_id: &str) -> Result<Vec<MemoryNode>>;

    /// Nodes whose anchor lies within the inclusive bounds, ordered by anchor then creation.
    async fn nodes_in_range(
        &self,
        conversation_id: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<MemoryNode>>;

    /// Nodes committed without a vector id because embedding failed.
    async fn nodes_missing_vector(&self, conversation_id: &str) -> Result<Vec<MemoryNode>>;

    async fn set_node_vector(
        &self,
        conversation_id: &str,
        node_id: i64,
        vector_id: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Creates the edge with `delta` as its value, or adds `delta` to the existing value
    /// and unions the tags. Atomic per edge.
    async fn apply_relationship_delta(
        &self,
        conversation_id: &str,
        source: &str,
        target: &str,
        delta: i64,
        tags: &BTreeSet<String>,
    ) -> Result<RelationshipEdge>;

    /// Edges where `entity` is the source or the target.
    async fn relationships_for(
        &self,
        conversation_id: &str,
        entity: &str,
    ) -> Result<Vec<RelationshipEdge>>;
}

#[async_trait]
pub trait NarrativeStore: Send + Sync {
    async fn append_saga(
        &self,
        conversation_id: &str,
        title: &str,
        content: &str,
    ) -> Result<SagaEntry>;

    async fn list_saga(&self, conversation_id: &str) -> Result<Vec<SagaEntry>>;

    /// Insert-only; an existing keyword yields [`DuplicateKeyword`](crate::StorageError::DuplicateKeyword).
    async fn insert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> Result<LoreEntry>;

    /// Inserts, or replaces content and source of the entry with the same keyword.
    async fn upsert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> Result<LoreEntry>;

    async fn get_lore(&self, conversation_id: &str, keyword: &str) -> Result<Option<LoreEntry>>;

    async fn list_lore(&self, conversation_id: &str) -> Result<Vec<LoreEntry>>;

    async fn log_interaction(
        &self,
        conversation_id: &str,
        log: &NewInteractionLog,
    ) -> Result<InteractionLog>;

    async fn interaction_logs(&self, conversation_id: &str) -> Result<Vec<InteractionLog>>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshot with the highest (message sequence, id).
    async fn latest_snapshot(&self, conversation_id: &str) -> Result<Option<WorldStateSnapshot>>;

    /// Appends a snapshot and refreshes the conversation's state cache in one transaction.
    ///
    /// Rejects a message older than the latest snapshot's message
    /// ([`OutOfOrder`](crate::StorageError::OutOfOrder)) and a stale `previous_id`
    /// ([`Conflict`](crate::StorageError::Conflict)).
    async fn insert_snapshot(
        &self,
        conversation_id: &str,
        snapshot: &NewSnapshot,
    ) -> Result<WorldStateSnapshot>;

    /// Latest snapshot whose message sequence is at or before `seq`.
    async fn snapshot_at_or_before(
        &self,
        conversation_id: &str,
        seq: i64,
    ) -> Result<Option<WorldStateSnapshot>>;

    async fn list_snapshots(&self, conversation_id: &str) -> Result<Vec<WorldStateSnapshot>>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule_fragment(&self, rule: &NewRuleFragment) -> Result<RuleFragment>;

    /// Inserts every fragment in one transaction; one invalid fragment inserts none.
    async fn insert_rule_fragments(&self, rules: &[NewRuleFragment]) -> Result<Vec<RuleFragment>>;

    async fn set_rule_active(&self, rule_id: i64, active: bool) -> Result<()>;

    /// Active fragments that are GLOBAL or CHARACTER-bound to `scope_value`.
    async fn candidate_rules(&self, scope_value: &str) -> Result<Vec<RuleFragment>>;
}

/// Everything the engine needs from persistence.
pub trait Store:
    ConversationStore
    + MessageStore
    + MemoryNodeStore
    + RelationshipStore
    + NarrativeStore
    + SnapshotStore
    + RuleStore
{
}

impl<T> Store for T where
    T: ConversationStore
        + MessageStore
        + MemoryNodeStore
        + RelationshipStore
        + NarrativeStore
        + SnapshotStore
        + RuleStore
{
}
