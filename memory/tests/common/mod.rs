//! Shared test helpers: collaborator mocks and an engine on a temporary SQLite file.
//!
//! - `MockSummarizer` records every call, can be switched to fail, and can delay.
//! - `MockEmbedder` returns `vec-<n>` and counts calls.
//! - `SlowSnapshotStore` delays snapshot inserts.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tavern_generation::{Embedder, EmbeddingError, GenerationError, Summarizer};
use tavern_memory::{EngineConfig, SessionCoordinator};
use tavern_storage::{
    Conversation, ConversationStore, InteractionLog, LoreEntry, MemoryNode, MemoryNodeStore,
    MessageRecord, MessageStore, NarrativeStore, NewInteractionLog, NewLoreEntry, NewMemoryNode,
    NewMessage, NewRuleFragment, NewSnapshot, RelationshipEdge, RelationshipStore, RuleFragment,
    RuleStore, SagaEntry, SnapshotStore, SqliteStore, Store, Tier, WorldStateSnapshot,
};
use tavern_storage::Result as StoreResult;

/// Summarizer double. Returns `summary(<n> texts)` unless told to fail.
#[derive(Debug, Default, Clone)]
pub struct MockSummarizer {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    call_count: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, texts: &[String]) -> Result<String, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(texts.to_vec());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerationError::Request("mock failure".to_string()));
        }
        Ok(format!("summary({} texts)", texts.len()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockEmbedder {
    call_count: Arc<AtomicUsize>,
}

impl MockEmbedder {
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<String, EmbeddingError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("vec-{}", n))
    }
}

pub struct TestEngine {
    pub engine: Arc<SessionCoordinator>,
    pub store: Arc<dyn Store>,
    pub summarizer: MockSummarizer,
    pub embedder: MockEmbedder,
    _dir: tempfile::TempDir,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        collaborator_timeout: Duration::from_secs(5),
        snapshot_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

/// SQLite store on a fresh file inside a temporary directory.
pub async fn temp_sqlite() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("engine.db");
    let store = SqliteStore::open(path.to_str().unwrap())
        .await
        .expect("Failed to create store");
    (store, dir)
}

pub async fn engine_with(config: EngineConfig) -> TestEngine {
    let (store, dir) = temp_sqlite().await;
    engine_on(Arc::new(store), dir, config)
}

/// Engine over a caller-built store; `dir` keeps its database file alive.
pub fn engine_on(store: Arc<dyn Store>, dir: tempfile::TempDir, config: EngineConfig) -> TestEngine {
    let summarizer = MockSummarizer::new();
    let embedder = MockEmbedder::default();
    let engine = Arc::new(SessionCoordinator::new(
        store.clone(),
        Arc::new(summarizer.clone()),
        Arc::new(embedder.clone()),
        config,
    ));
    TestEngine {
        engine,
        store,
        summarizer,
        embedder,
        _dir: dir,
    }
}

pub async fn engine() -> TestEngine {
    engine_with(test_config()).await
}

/// Store that stalls before every snapshot insert, so snapshot commits can outlast
/// their timeout. Everything else goes straight to the inner SQLite store.
pub struct SlowSnapshotStore {
    inner: SqliteStore,
    delay: Duration,
}

impl SlowSnapshotStore {
    pub fn new(inner: SqliteStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ConversationStore for SlowSnapshotStore {
    async fn create_conversation(&self, label: &str, initial_state: &Value) -> StoreResult<Conversation> {
        self.inner.create_conversation(label, initial_state).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        self.inner.list_conversations().await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> StoreResult<bool> {
        self.inner.delete_conversation(conversation_id).await
    }
}

#[async_trait]
impl MessageStore for SlowSnapshotStore {
    async fn append_message(&self, conversation_id: &str, message: &NewMessage) -> StoreResult<MessageRecord> {
        self.inner.append_message(conversation_id, message).await
    }

    async fn get_message(&self, conversation_id: &str, message_id: i64) -> StoreResult<Option<MessageRecord>> {
        self.inner.get_message(conversation_id, message_id).await
    }

    async fn unsummarized_messages(&self, conversation_id: &str) -> StoreResult<Vec<MessageRecord>> {
        self.inner.unsummarized_messages(conversation_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<MessageRecord>> {
        self.inner.list_messages(conversation_id, offset, limit).await
    }

    async fn truncate_after(&self, conversation_id: &str, message_id: i64, state: &Value) -> StoreResult<u64> {
        self.inner.truncate_after(conversation_id, message_id, state).await
    }
}

#[async_trait]
impl MemoryNodeStore for SlowSnapshotStore {
    async fn commit_node(
        &self,
        conversation_id: &str,
        node: &NewMemoryNode,
        source_ids: &[i64],
    ) -> StoreResult<MemoryNode> {
        self.inner.commit_node(conversation_id, node, source_ids).await
    }

    async fn unfolded_nodes(&self, conversation_id: &str, tier: Tier) -> StoreResult<Vec<MemoryNode>> {
        self.inner.unfolded_nodes(conversation_id, tier).await
    }

    async fn latest_node(&self, conversation_id: &str, tier: Tier) -> StoreResult<Option<MemoryNode>> {
        self.inner.latest_node(conversation_id, tier).await
    }

    async fn list_nodes(&self, conversation_id: &str) -> StoreResult<Vec<MemoryNode>> {
        self.inner.list_nodes(conversation_id).await
    }

    async fn nodes_in_range(
        &self,
        conversation_id: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> StoreResult<Vec<MemoryNode>> {
        self.inner.nodes_in_range(conversation_id, from, to).await
    }

    async fn nodes_missing_vector(&self, conversation_id: &str) -> StoreResult<Vec<MemoryNode>> {
        self.inner.nodes_missing_vector(conversation_id).await
    }

    async fn set_node_vector(&self, conversation_id: &str, node_id: i64, vector_id: &str) -> StoreResult<()> {
        self.inner.set_node_vector(conversation_id, node_id, vector_id).await
    }
}

#[async_trait]
impl RelationshipStore for SlowSnapshotStore {
    async fn apply_relationship_delta(
        &self,
        conversation_id: &str,
        source: &str,
        target: &str,
        delta: i64,
        tags: &BTreeSet<String>,
    ) -> StoreResult<RelationshipEdge> {
        self.inner
            .apply_relationship_delta(conversation_id, source, target, delta, tags)
            .await
    }

    async fn relationships_for(&self, conversation_id: &str, entity: &str) -> StoreResult<Vec<RelationshipEdge>> {
        self.inner.relationships_for(conversation_id, entity).await
    }
}

#[async_trait]
impl NarrativeStore for SlowSnapshotStore {
    async fn append_saga(&self, conversation_id: &str, title: &str, content: &str) -> StoreResult<SagaEntry> {
        self.inner.append_saga(conversation_id, title, content).await
    }

    async fn list_saga(&self, conversation_id: &str) -> StoreResult<Vec<SagaEntry>> {
        self.inner.list_saga(conversation_id).await
    }

    async fn insert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> StoreResult<LoreEntry> {
        self.inner.insert_lore(conversation_id, entry).await
    }

    async fn upsert_lore(&self, conversation_id: &str, entry: &NewLoreEntry) -> StoreResult<LoreEntry> {
        self.inner.upsert_lore(conversation_id, entry).await
    }

    async fn get_lore(&self, conversation_id: &str, keyword: &str) -> StoreResult<Option<LoreEntry>> {
        self.inner.get_lore(conversation_id, keyword).await
    }

    async fn list_lore(&self, conversation_id: &str) -> StoreResult<Vec<LoreEntry>> {
        self.inner.list_lore(conversation_id).await
    }

    async fn log_interaction(&self, conversation_id: &str, log: &NewInteractionLog) -> StoreResult<InteractionLog> {
        self.inner.log_interaction(conversation_id, log).await
    }

    async fn interaction_logs(&self, conversation_id: &str) -> StoreResult<Vec<InteractionLog>> {
        self.inner.interaction_logs(conversation_id).await
    }
}

#[async_trait]
impl SnapshotStore for SlowSnapshotStore {
    async fn latest_snapshot(&self, conversation_id: &str) -> StoreResult<Option<WorldStateSnapshot>> {
        self.inner.latest_snapshot(conversation_id).await
    }

    async fn insert_snapshot(
        &self,
        conversation_id: &str,
        snapshot: &NewSnapshot,
    ) -> StoreResult<WorldStateSnapshot> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_snapshot(conversation_id, snapshot).await
    }

    async fn snapshot_at_or_before(
        &self,
        conversation_id: &str,
        seq: i64,
    ) -> StoreResult<Option<WorldStateSnapshot>> {
        self.inner.snapshot_at_or_before(conversation_id, seq).await
    }

    async fn list_snapshots(&self, conversation_id: &str) -> StoreResult<Vec<WorldStateSnapshot>> {
        self.inner.list_snapshots(conversation_id).await
    }
}

#[async_trait]
impl RuleStore for SlowSnapshotStore {
    async fn insert_rule_fragment(&self, rule: &NewRuleFragment) -> StoreResult<RuleFragment> {
        self.inner.insert_rule_fragment(rule).await
    }

    async fn insert_rule_fragments(&self, rules: &[NewRuleFragment]) -> StoreResult<Vec<RuleFragment>> {
        self.inner.insert_rule_fragments(rules).await
    }

    async fn set_rule_active(&self, rule_id: i64, active: bool) -> StoreResult<()> {
        self.inner.set_rule_active(rule_id, active).await
    }

    async fn candidate_rules(&self, scope_value: &str) -> StoreResult<Vec<RuleFragment>> {
        self.inner.candidate_rules(scope_value).await
    }
}
