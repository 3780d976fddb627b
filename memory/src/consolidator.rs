//! # Memory consolidator
//!
//! Folds raw messages into MICRO nodes and MICRO nodes into MACRO nodes. The
//! per-conversation state is derived from persisted flags on every attempt:
//!
//! | State          | Condition |
//! |----------------|-----------|
//! | `Consolidating`| the conversation's consolidation lock is held |
//! | `MicroPending` | unsummarized messages >= `micro_threshold` |
//! | `MacroPending` | unfolded MICRO nodes >= `macro_threshold` |
//! | `Idle`         | otherwise |
//!
//! A batch takes every pending source (chunked by the threshold once twice the
//! threshold has accumulated). A failed or timed-out summarizer call commits
//! nothing, so the unchanged pending count re-triggers on the next attempt.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::extract::{parse_merge_output, RelationshipDelta};
use crate::graph::RelationshipGraph;
use crate::locks::{ConversationLock, ConversationLocks};
use crate::timeline::{later_anchor, timeline_tag};
use std::sync::Arc;
use tavern_generation::{Embedder, Summarizer};
use tavern_storage::{MemoryNode, MessageRecord, NewMemoryNode, Store, Tier};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Consolidation state of one conversation, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationState {
    Idle,
    MicroPending,
    MacroPending,
    Consolidating,
}

/// Result of one consolidation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationOutcome {
    /// Nothing reached a threshold.
    Idle {
        pending_messages: usize,
        pending_micro: usize,
    },
    /// Another attempt holds the conversation's consolidation lock.
    InFlight,
    /// A threshold was reached but the summarizer failed; retried on the next trigger.
    Deferred { tier: Tier },
    /// Nodes committed by this attempt, in creation order.
    Consolidated { nodes: Vec<MemoryNode> },
}

/// One item being folded: a message for MICRO, a MICRO node for MACRO.
struct Source {
    id: i64,
    first_seq: i64,
    last_seq: i64,
    anchor: String,
    text: String,
}

impl Source {
    fn from_message(message: &MessageRecord) -> Self {
        Self {
            id: message.id,
            first_seq: message.seq,
            last_seq: message.seq,
            anchor: timeline_tag(message.created_at),
            text: format!("{}: {}", message.role, message.content),
        }
    }

    fn from_node(node: &MemoryNode) -> Self {
        Self {
            id: node.id,
            first_seq: node.first_seq,
            last_seq: node.last_seq,
            anchor: node.timeline_anchor.clone(),
            text: format!("[{}] {}", node.timeline_anchor, node.summary),
        }
    }
}

/// Sources to fold next: none below the threshold, everything below twice the
/// threshold, otherwise one threshold-sized chunk.
pub(crate) fn batch_len(pending: usize, threshold: usize) -> usize {
    if pending < threshold {
        0
    } else if pending < threshold.saturating_mul(2) {
        pending
    } else {
        threshold
    }
}

pub(crate) struct Consolidator {
    store: Arc<dyn Store>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    graph: RelationshipGraph,
    locks: Arc<ConversationLocks>,
    config: EngineConfig,
}

impl Consolidator {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        locks: Arc<ConversationLocks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            graph: RelationshipGraph::new(store.clone()),
            store,
            summarizer,
            embedder,
            locks,
            config,
        }
    }

    fn threshold(&self, tier: Tier) -> usize {
        match tier {
            Tier::Micro => self.config.micro_threshold,
            Tier::Macro => self.config.macro_threshold,
        }
    }

    pub async fn state(&self, conversation_id: &str) -> Result<ConsolidationState> {
        let lock = self.locks.get(conversation_id);
        if lock.consolidation.try_lock().is_err() {
            return Ok(ConsolidationState::Consolidating);
        }
        let pending = self.store.unsummarized_messages(conversation_id).await?.len();
        if pending >= self.config.micro_threshold {
            return Ok(ConsolidationState::MicroPending);
        }
        let micro = self.store.unfolded_nodes(conversation_id, Tier::Micro).await?.len();
        if micro >= self.config.macro_threshold {
            return Ok(ConsolidationState::MacroPending);
        }
        Ok(ConsolidationState::Idle)
    }

    /// Runs one consolidation pass: vector backfill, then every MICRO fold the
    /// pending messages allow, then every MACRO fold the unfolded MICRO nodes allow.
    #[instrument(skip(self))]
    pub async fn attempt(&self, conversation_id: &str) -> Result<ConsolidationOutcome> {
        let lock = self.locks.get(conversation_id);
        let Ok(_consolidating) = lock.consolidation.try_lock() else {
            debug!(conversation_id = %conversation_id, "Consolidation already in flight");
            return Ok(ConsolidationOutcome::InFlight);
        };

        self.backfill_vectors(conversation_id, &lock).await?;

        let mut created = Vec::new();
        let mut deferred = None;
        for tier in [Tier::Micro, Tier::Macro] {
            if !self.fold_tier(conversation_id, tier, &lock, &mut created).await? {
                deferred.get_or_insert(tier);
            }
        }

        if !created.is_empty() {
            return Ok(ConsolidationOutcome::Consolidated { nodes: created });
        }
        if let Some(tier) = deferred {
            return Ok(ConsolidationOutcome::Deferred { tier });
        }
        let pending_messages = self.store.unsummarized_messages(conversation_id).await?.len();
        let pending_micro = self.store.unfolded_nodes(conversation_id, Tier::Micro).await?.len();
        debug!(
            conversation_id = %conversation_id,
            pending_messages,
            pending_micro,
            "Below consolidation thresholds"
        );
        Ok(ConsolidationOutcome::Idle {
            pending_messages,
            pending_micro,
        })
    }

    async fn pending_sources(&self, conversation_id: &str, tier: Tier) -> Result<Vec<Source>> {
        Ok(match tier {
            Tier::Micro => self
                .store
                .unsummarized_messages(conversation_id)
                .await?
                .iter()
                .map(Source::from_message)
                .collect(),
            Tier::Macro => self
                .store
                .unfolded_nodes(conversation_id, Tier::Micro)
                .await?
                .iter()
                .map(Source::from_node)
                .collect(),
        })
    }

    /// Folds `tier` until its pending sources fall below the threshold.
    /// Returns false if the summarizer failed on the way.
    async fn fold_tier(
        &self,
        conversation_id: &str,
        tier: Tier,
        lock: &ConversationLock,
        created: &mut Vec<MemoryNode>,
    ) -> Result<bool> {
        let threshold = self.threshold(tier);
        loop {
            let sources = self.pending_sources(conversation_id, tier).await?;
            let take = batch_len(sources.len(), threshold);
            if take == 0 {
                return Ok(true);
            }
            match self.fold(conversation_id, tier, &sources[..take], lock).await? {
                Some(node) => created.push(node),
                None => return Ok(false),
            }
        }
    }

    async fn fold(
        &self,
        conversation_id: &str,
        tier: Tier,
        batch: &[Source],
        lock: &ConversationLock,
    ) -> Result<Option<MemoryNode>> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(None);
        };
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let Some(raw) = self.summarize(conversation_id, tier, &texts).await else {
            return Ok(None);
        };

        let (summary, deltas) = match tier {
            Tier::Micro => (raw.trim().to_string(), Vec::new()),
            Tier::Macro => {
                let merged = parse_merge_output(&raw);
                (merged.summary, merged.deltas)
            }
        };
        if summary.is_empty() {
            warn!(conversation_id = %conversation_id, tier = %tier, "Summary empty after extraction; deferring");
            return Ok(None);
        }

        let previous = self.store.latest_node(conversation_id, tier).await?;
        let timeline_anchor = later_anchor(
            last.anchor.clone(),
            previous.as_ref().map(|n| n.timeline_anchor.as_str()),
        );
        let vector_id = self.embed(conversation_id, &summary).await;

        let node = NewMemoryNode {
            tier,
            summary,
            timeline_anchor,
            first_seq: first.first_seq,
            last_seq: last.last_seq,
            vector_id,
        };
        let source_ids: Vec<i64> = batch.iter().map(|s| s.id).collect();
        let committed = {
            let _writer = lock.writer.lock().await;
            self.store
                .commit_node(conversation_id, &node, &source_ids)
                .await?
        };

        if tier == Tier::Macro {
            self.apply_deltas(conversation_id, &deltas, lock).await;
            if self.config.saga_enabled {
                self.write_chapter(conversation_id, &committed, lock).await;
            }
        }
        Ok(Some(committed))
    }

    async fn summarize(&self, conversation_id: &str, tier: Tier, texts: &[String]) -> Option<String> {
        let limit = self.config.collaborator_timeout;
        match timeout(limit, self.summarizer.summarize(texts)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
            Ok(Ok(_)) => {
                warn!(conversation_id = %conversation_id, tier = %tier, "Summarizer returned empty text; deferring");
                None
            }
            Ok(Err(e)) => {
                warn!(conversation_id = %conversation_id, tier = %tier, error = %e, "Summarizer failed; deferring");
                None
            }
            Err(_) => {
                warn!(
                    conversation_id = %conversation_id,
                    tier = %tier,
                    timeout_ms = limit.as_millis() as u64,
                    "Summarizer timed out; deferring"
                );
                None
            }
        }
    }

    async fn embed(&self, conversation_id: &str, text: &str) -> Option<String> {
        let limit = self.config.collaborator_timeout;
        match timeout(limit, self.embedder.embed(text)).await {
            Ok(Ok(vector_id)) => Some(vector_id),
            Ok(Err(e)) => {
                warn!(conversation_id = %conversation_id, error = %e, "Embedding failed; will backfill");
                None
            }
            Err(_) => {
                warn!(conversation_id = %conversation_id, "Embedding timed out; will backfill");
                None
            }
        }
    }

    /// Retries embedding for nodes committed without a vector id. Stops at the first failure.
    async fn backfill_vectors(&self, conversation_id: &str, lock: &ConversationLock) -> Result<()> {
        for node in self.store.nodes_missing_vector(conversation_id).await? {
            let Some(vector_id) = self.embed(conversation_id, &node.summary).await else {
                break;
            };
            let _writer = lock.writer.lock().await;
            self.store
                .set_node_vector(conversation_id, node.id, &vector_id)
                .await?;
            debug!(conversation_id = %conversation_id, node_id = node.id, "Vector backfilled");
        }
        Ok(())
    }

    async fn apply_deltas(&self, conversation_id: &str, deltas: &[RelationshipDelta], lock: &ConversationLock) {
        for delta in deltas {
            let _writer = lock.writer.lock().await;
            if let Err(e) = self
                .graph
                .apply_delta(conversation_id, &delta.source, &delta.target, delta.delta, &delta.tags)
                .await
            {
                error!(
                    conversation_id = %conversation_id,
                    source = %delta.source,
                    target = %delta.target,
                    error = %e,
                    "Failed to apply extracted relationship delta"
                );
            }
        }
        if !deltas.is_empty() {
            info!(conversation_id = %conversation_id, count = deltas.len(), "Relationship deltas applied");
        }
    }

    async fn write_chapter(&self, conversation_id: &str, macro_node: &MemoryNode, lock: &ConversationLock) {
        let Some(content) = self
            .summarize(conversation_id, Tier::Macro, &[macro_node.summary.clone()])
            .await
        else {
            return;
        };
        let _writer = lock.writer.lock().await;
        let result = async {
            let number = self.store.list_saga(conversation_id).await?.len() + 1;
            self.store
                .append_saga(conversation_id, &format!("Chapter {}", number), content.trim())
                .await
        }
        .await;
        match result {
            Ok(entry) => info!(conversation_id = %conversation_id, title = %entry.title, "Saga chapter written"),
            Err(e) => error!(conversation_id = %conversation_id, error = %e, "Failed to write saga chapter"),
        }
    }
}
