//! Per-conversation locks.
//!
//! `writer` serialises every mutating store call for a conversation (sequence
//! assignment, node and snapshot commits, graph deltas). `consolidation` is held
//! across summarizer calls so at most one consolidation is in flight per
//! conversation; it is only ever taken with `try_lock`.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub(crate) struct ConversationLock {
    pub(crate) writer: Mutex<()>,
    pub(crate) consolidation: Mutex<()>,
}

#[derive(Default)]
pub(crate) struct ConversationLocks {
    locks: DashMap<String, Arc<ConversationLock>>,
}

impl ConversationLocks {
    pub(crate) fn get(&self, conversation_id: &str) -> Arc<ConversationLock> {
        if let Some(lock) = self.locks.get(conversation_id) {
            return lock.clone();
        }
        self.locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the conversation's entry if no caller holds its lock. Returns whether it was dropped.
    pub(crate) fn prune(&self, conversation_id: &str) -> bool {
        self.locks
            .remove_if(conversation_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub(crate) fn remove(&self, conversation_id: &str) {
        self.locks.remove(conversation_id);
    }
}
