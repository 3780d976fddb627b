//! # Relationship graph
//!
//! Additive affinity edges between entities of one conversation. Every
//! [`apply_delta`](RelationshipGraph::apply_delta) is one observed interaction:
//! values accumulate, tags union, nothing is deduplicated.

use crate::error::{EngineError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tavern_storage::{RelationshipEdge, Store};

#[derive(Clone)]
pub struct RelationshipGraph {
    store: Arc<dyn Store>,
}

impl RelationshipGraph {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Adds `delta` to the (source, target) edge, creating it with value `delta` if absent.
    pub async fn apply_delta(
        &self,
        conversation_id: &str,
        source: &str,
        target: &str,
        delta: i64,
        tags: &BTreeSet<String>,
    ) -> Result<RelationshipEdge> {
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() || target.is_empty() {
            return Err(EngineError::Validation(
                "relationship source and target must be non-empty".to_string(),
            ));
        }
        let edge = self
            .store
            .apply_relationship_delta(conversation_id, source, target, delta, tags)
            .await?;
        Ok(edge)
    }

    /// Edges touching `entity`, strongest first; equal strength is broken by most recent update.
    pub async fn top_edges(
        &self,
        conversation_id: &str,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<RelationshipEdge>> {
        let edges = self.store.relationships_for(conversation_id, entity).await?;
        Ok(rank_edges(edges, limit))
    }
}

pub(crate) fn rank_edges(mut edges: Vec<RelationshipEdge>, limit: usize) -> Vec<RelationshipEdge> {
    edges.sort_by(|a, b| {
        b.value
            .unsigned_abs()
            .cmp(&a.value.unsigned_abs())
            .then(b.revision.cmp(&a.revision))
    });
    edges.truncate(limit);
    edges
}
