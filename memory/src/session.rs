//! # Session coordinator
//!
//! The engine's public entry point. Mutating calls for one conversation are
//! serialised on that conversation's writer lock; different conversations never
//! contend. `append_message` persists first and then queues a snapshot and a
//! consolidation attempt on the conversation's worker, so a failing background
//! step never undoes a stored message.

use crate::config::EngineConfig;
use crate::consolidator::{ConsolidationOutcome, ConsolidationState, Consolidator};
use crate::error::{EngineError, Result};
use crate::graph::RelationshipGraph;
use crate::locks::ConversationLocks;
use crate::queue::{Job, JobQueues, JobRunner};
use crate::rules::RuleResolver;
use crate::snapshot::Snapshotter;
use crate::timeline::TimeRange;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tavern_generation::{Embedder, Summarizer};
use tavern_storage::{
    Conversation, InteractionLog, LoreEntry, LoreSource, MemoryNode, MessageRecord,
    NewInteractionLog, NewLoreEntry, NewMessage, RelationshipEdge, Role, RuleFragment, SagaEntry,
    Store, Tier, WorldStateSnapshot,
};
use tracing::{info, instrument};

/// Spine text for a conversation with no memory nodes.
pub const EMPTY_SPINE: &str = "No history yet.";

/// A message to append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendMessage {
    pub role: Role,
    pub content: String,
    pub tags: Vec<String>,
    /// World state after this message; `None` carries the current state forward.
    pub state: Option<Value>,
}

impl AppendMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tags: Vec::new(),
            state: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }
}

pub struct SessionCoordinator {
    store: Arc<dyn Store>,
    locks: Arc<ConversationLocks>,
    graph: RelationshipGraph,
    rules: RuleResolver,
    snapshotter: Snapshotter,
    queues: JobQueues,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(ConversationLocks::default());
        let snapshotter = Snapshotter::new(store.clone(), config.snapshot_timeout);
        let runner = JobRunner {
            snapshotter: snapshotter.clone(),
            consolidator: Consolidator::new(
                store.clone(),
                summarizer,
                embedder,
                locks.clone(),
                config.clone(),
            ),
            locks: locks.clone(),
        };
        Self {
            graph: RelationshipGraph::new(store.clone()),
            rules: RuleResolver::new(store.clone()),
            queues: JobQueues::new(runner, config.max_workers, config.worker_idle_timeout),
            snapshotter,
            locks,
            store,
        }
    }

    async fn require_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                EngineError::Consistency(format!("conversation {} does not exist", conversation_id))
            })
    }

    // ---------- conversations ----------

    pub async fn create_conversation(&self, label: &str, initial_state: Value) -> Result<Conversation> {
        if label.trim().is_empty() {
            return Err(EngineError::Validation("conversation label is empty".to_string()));
        }
        Ok(self.store.create_conversation(label.trim(), &initial_state).await?)
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.store.list_conversations().await?)
    }

    /// Deletes the conversation with everything it owns. Returns false if it did not exist.
    #[instrument(skip(self))]
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let deleted = {
            let lock = self.locks.get(conversation_id);
            let _writer = lock.writer.lock().await;
            self.store.delete_conversation(conversation_id).await?
        };
        self.queues.remove(conversation_id);
        self.locks.remove(conversation_id);
        if deleted {
            info!(conversation_id = %conversation_id, "Conversation deleted");
        }
        Ok(deleted)
    }

    // ---------- write path ----------

    /// Validates and persists a message, then queues its snapshot and a consolidation attempt.
    #[instrument(skip(self, message), fields(role = %message.role))]
    pub async fn append_message(&self, conversation_id: &str, message: AppendMessage) -> Result<i64> {
        if message.content.trim().is_empty() {
            return Err(EngineError::Validation("message content is empty".to_string()));
        }
        if message.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(EngineError::Validation("message tags must be non-empty".to_string()));
        }

        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        self.require_conversation(conversation_id).await?;
        let new_message = NewMessage::new(message.role, message.content, message.tags);
        let record = self.store.append_message(conversation_id, &new_message).await?;

        // Queued under the writer lock so snapshot jobs follow sequence order.
        self.queues.submit(
            conversation_id,
            Job::Snapshot {
                message_id: record.id,
                state: message.state,
            },
        );
        self.queues.submit(conversation_id, Job::Consolidate);
        Ok(record.id)
    }

    /// Commits `state` as the snapshot after `message_id` immediately, bypassing the queue.
    #[instrument(skip(self, state))]
    pub async fn commit_state(
        &self,
        conversation_id: &str,
        message_id: i64,
        state: Value,
    ) -> Result<WorldStateSnapshot> {
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        self.snapshotter.commit(conversation_id, message_id, state).await
    }

    /// Runs a consolidation attempt now instead of waiting for the next append.
    pub async fn consolidate_now(&self, conversation_id: &str) -> Result<ConsolidationOutcome> {
        self.require_conversation(conversation_id).await?;
        self.queues.consolidator().attempt(conversation_id).await
    }

    pub async fn consolidation_state(&self, conversation_id: &str) -> Result<ConsolidationState> {
        self.require_conversation(conversation_id).await?;
        self.queues.consolidator().state(conversation_id).await
    }

    /// Adds one observed interaction to the (source, target) edge.
    #[instrument(skip(self, tags))]
    pub async fn apply_relationship_delta(
        &self,
        conversation_id: &str,
        source: &str,
        target: &str,
        delta: i64,
        tags: &BTreeSet<String>,
    ) -> Result<RelationshipEdge> {
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        self.graph
            .apply_delta(conversation_id, source, target, delta, tags)
            .await
    }

    // ---------- state ----------

    pub async fn get_current_state(&self, conversation_id: &str) -> Result<Value> {
        self.snapshotter.current_state(conversation_id).await
    }

    /// State committed at or immediately before `message_id`. Never modifies history.
    pub async fn rollback_to(&self, conversation_id: &str, message_id: i64) -> Result<Value> {
        self.snapshotter.rollback(conversation_id, message_id).await
    }

    /// Discards every message after `message_id` and makes the state at that message
    /// current again. Unlike [`rollback_to`](Self::rollback_to) this deletes history:
    /// later messages, their snapshots and interaction logs are gone. Refused with
    /// [`EngineError::Consistency`] when memory nodes already cover a discarded message.
    #[instrument(skip(self))]
    pub async fn truncate_after(&self, conversation_id: &str, message_id: i64) -> Result<Value> {
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        let state = self.snapshotter.rollback(conversation_id, message_id).await?;
        let deleted = self
            .store
            .truncate_after(conversation_id, message_id, &state)
            .await?;
        info!(conversation_id = %conversation_id, message_id, deleted, "History truncated");
        Ok(state)
    }

    pub async fn snapshots(&self, conversation_id: &str) -> Result<Vec<WorldStateSnapshot>> {
        self.require_conversation(conversation_id).await?;
        Ok(self.store.list_snapshots(conversation_id).await?)
    }

    // ---------- memory ----------

    /// Memory nodes anchored within `range`, in timeline order.
    pub async fn query_memory(&self, conversation_id: &str, range: TimeRange) -> Result<Vec<MemoryNode>> {
        let (from, to) = range.tags();
        self.get_memory_timeline(conversation_id, from.as_deref(), to.as_deref())
            .await
    }

    /// Memory nodes whose timeline anchor lies between the inclusive tags.
    pub async fn get_memory_timeline(
        &self,
        conversation_id: &str,
        from_tag: Option<&str>,
        to_tag: Option<&str>,
    ) -> Result<Vec<MemoryNode>> {
        self.require_conversation(conversation_id).await?;
        Ok(self
            .store
            .nodes_in_range(conversation_id, from_tag, to_tag)
            .await?)
    }

    /// Long-term memory as prompt text: every MACRO node, then the MICRO nodes not yet folded.
    pub async fn memory_spine(&self, conversation_id: &str) -> Result<String> {
        self.require_conversation(conversation_id).await?;
        let nodes = self.store.list_nodes(conversation_id).await?;
        let macros = nodes.iter().filter(|n| n.tier == Tier::Macro);
        let micros = nodes.iter().filter(|n| n.tier == Tier::Micro && !n.folded);
        let lines: Vec<String> = macros
            .map(|n| format!("[Macro|{}] {}", n.timeline_anchor, n.summary))
            .chain(micros.map(|n| format!("[Micro|{}] {}", n.timeline_anchor, n.summary)))
            .collect();
        if lines.is_empty() {
            return Ok(EMPTY_SPINE.to_string());
        }
        Ok(lines.join("\n"))
    }

    pub async fn list_saga(&self, conversation_id: &str) -> Result<Vec<SagaEntry>> {
        self.require_conversation(conversation_id).await?;
        Ok(self.store.list_saga(conversation_id).await?)
    }

    // ---------- reads for prompt assembly ----------

    pub async fn resolve_rules(&self, scope_value: &str, tags: &BTreeSet<String>) -> Result<Vec<RuleFragment>> {
        self.rules.resolve(scope_value, tags).await
    }

    pub async fn get_relationships(
        &self,
        conversation_id: &str,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<RelationshipEdge>> {
        self.graph.top_edges(conversation_id, entity, limit).await
    }

    /// Messages in sequence order; `page` starts at 1.
    pub async fn history(&self, conversation_id: &str, page: u32, page_size: u32) -> Result<Vec<MessageRecord>> {
        if page == 0 || page_size == 0 {
            return Err(EngineError::Validation("page and page size start at 1".to_string()));
        }
        self.require_conversation(conversation_id).await?;
        let offset = i64::from(page - 1) * i64::from(page_size);
        Ok(self
            .store
            .list_messages(conversation_id, offset, i64::from(page_size))
            .await?)
    }

    // ---------- lore and audit ----------

    /// Inserts or replaces the entry for `keyword`.
    pub async fn upsert_lore(
        &self,
        conversation_id: &str,
        keyword: &str,
        content: &str,
        source: LoreSource,
    ) -> Result<LoreEntry> {
        let entry = lore_entry(keyword, content, source)?;
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        self.require_conversation(conversation_id).await?;
        Ok(self.store.upsert_lore(conversation_id, &entry).await?)
    }

    /// Inserts a new entry; an existing keyword is [`EngineError::DuplicateKeyword`].
    pub async fn create_lore(
        &self,
        conversation_id: &str,
        keyword: &str,
        content: &str,
        source: LoreSource,
    ) -> Result<LoreEntry> {
        let entry = lore_entry(keyword, content, source)?;
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        self.require_conversation(conversation_id).await?;
        Ok(self.store.insert_lore(conversation_id, &entry).await?)
    }

    pub async fn get_lore(&self, conversation_id: &str, keyword: &str) -> Result<Option<LoreEntry>> {
        Ok(self.store.get_lore(conversation_id, keyword.trim()).await?)
    }

    pub async fn list_lore(&self, conversation_id: &str) -> Result<Vec<LoreEntry>> {
        Ok(self.store.list_lore(conversation_id).await?)
    }

    /// Records how `message_id` was generated. Audit only; never read by the engine.
    pub async fn log_interaction(
        &self,
        conversation_id: &str,
        message_id: i64,
        prompt: &str,
        context: &str,
        model: &str,
    ) -> Result<InteractionLog> {
        let log = NewInteractionLog {
            message_id,
            prompt: prompt.to_string(),
            context: context.to_string(),
            model: model.to_string(),
        };
        let lock = self.locks.get(conversation_id);
        let _writer = lock.writer.lock().await;
        Ok(self.store.log_interaction(conversation_id, &log).await?)
    }

    pub async fn interaction_logs(&self, conversation_id: &str) -> Result<Vec<InteractionLog>> {
        Ok(self.store.interaction_logs(conversation_id).await?)
    }

    /// Conversations with a live background worker. Idle workers retire after
    /// [`EngineConfig::worker_idle_timeout`].
    pub fn active_conversations(&self) -> usize {
        self.queues.active_workers()
    }

    /// Resolves once every queued snapshot and consolidation job has finished.
    pub async fn wait_idle(&self) {
        self.queues.wait_idle().await;
    }
}

fn lore_entry(keyword: &str, content: &str, source: LoreSource) -> Result<NewLoreEntry> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(EngineError::Validation("lore keyword is empty".to_string()));
    }
    if content.trim().is_empty() {
        return Err(EngineError::Validation("lore content is empty".to_string()));
    }
    Ok(NewLoreEntry {
        keyword: keyword.to_string(),
        content: content.to_string(),
        source,
    })
}
