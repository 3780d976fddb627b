//! Integration tests for consolidation driven through [`tavern_memory::SessionCoordinator`].
//!
//! Covers the MICRO count property, failure and timeout deferral, and contiguous
//! non-overlapping node ranges under bursts.

mod common;

use common::{engine, engine_with, test_config};
use serde_json::json;
use std::time::Duration;
use tavern_memory::{timeline_tag, AppendMessage, EngineConfig};
use tavern_storage::{MemoryNode, Role, Tier};

fn message(i: usize) -> AppendMessage {
    AppendMessage::new(Role::User, format!("turn {}", i))
}

fn assert_contiguous(nodes: &[MemoryNode]) {
    let mut next_seq = 1;
    for node in nodes {
        assert_eq!(node.first_seq, next_seq, "gap or overlap before node {}", node.id);
        assert!(node.last_seq >= node.first_seq);
        next_seq = node.last_seq + 1;
    }
}

/// **Test: Five messages produce one MICRO node anchored at the fifth message.**
///
/// **Setup:** Fresh conversation, default thresholds.
/// **Action:** Append 5 messages, wait for background jobs.
/// **Expected:** One MICRO node, all 5 messages summarized, anchor = tag of message 5.
#[tokio::test]
async fn test_five_messages_make_one_micro_node() {
    let t = engine().await;
    let conv = t.engine.create_conversation("e2e", json!({})).await.unwrap();

    for i in 0..5 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
    }
    t.engine.wait_idle().await;

    let nodes = t.store.list_nodes(&conv.id).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].tier, Tier::Micro);
    assert_eq!((nodes[0].first_seq, nodes[0].last_seq), (1, 5));
    assert!(t.store.unsummarized_messages(&conv.id).await.unwrap().is_empty());

    let history = t.engine.history(&conv.id, 1, 10).await.unwrap();
    assert!(history.iter().all(|m| m.summarized));
    assert_eq!(nodes[0].timeline_anchor, timeline_tag(history[4].created_at));
    assert_eq!(t.summarizer.call_count(), 1);
    assert_eq!(nodes[0].vector_id.as_deref(), Some("vec-1"));
}

/// **Test: A failed summary is retried by the next message over everything pending.**
///
/// **Setup:** Summarizer fails when the 5th message triggers.
/// **Action:** Append 5 (failing), then a 6th (succeeding).
/// **Expected:** No node after 5; one node covering all 6 messages after the 6th.
#[tokio::test]
async fn test_failed_trigger_is_retried_on_next_message() {
    let t = engine().await;
    let conv = t.engine.create_conversation("retry", json!({})).await.unwrap();

    for i in 0..4 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
    }
    t.engine.wait_idle().await;
    assert_eq!(t.summarizer.call_count(), 0);

    t.summarizer.set_failing(true);
    t.engine.append_message(&conv.id, message(4)).await.unwrap();
    t.engine.wait_idle().await;

    assert_eq!(t.summarizer.call_count(), 1);
    assert!(t.store.list_nodes(&conv.id).await.unwrap().is_empty());
    assert_eq!(t.store.unsummarized_messages(&conv.id).await.unwrap().len(), 5);

    t.summarizer.set_failing(false);
    t.engine.append_message(&conv.id, message(5)).await.unwrap();
    t.engine.wait_idle().await;

    let nodes = t.store.list_nodes(&conv.id).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!((nodes[0].first_seq, nodes[0].last_seq), (1, 6));
    assert_eq!(t.summarizer.calls()[1].len(), 6);
    assert!(t.store.unsummarized_messages(&conv.id).await.unwrap().is_empty());
}

/// **Test: MICRO node count equals floor(summarized / threshold).**
///
/// **Setup:** MICRO threshold 5, MACRO disabled by a high threshold.
/// **Action:** Append 23 messages one at a time, waiting after each.
/// **Expected:** 4 nodes, 20 summarized messages, contiguous ranges of exactly 5.
#[tokio::test]
async fn test_micro_count_matches_summarized_messages() {
    let t = engine_with(EngineConfig {
        macro_threshold: 1000,
        ..test_config()
    })
    .await;
    let conv = t.engine.create_conversation("count", json!({})).await.unwrap();

    for i in 0..23 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
        t.engine.wait_idle().await;
    }

    let nodes = t.store.list_nodes(&conv.id).await.unwrap();
    let summarized = t
        .engine
        .history(&conv.id, 1, 100)
        .await
        .unwrap()
        .iter()
        .filter(|m| m.summarized)
        .count();
    assert_eq!(summarized, 20);
    assert_eq!(nodes.len(), summarized / 5);
    assert!(nodes.iter().all(|n| n.last_seq - n.first_seq + 1 == 5));
    assert_contiguous(&nodes);
}

/// **Test: A burst of appends never yields overlapping or duplicate nodes.**
///
/// **Setup:** Slow summarizer so triggers pile up while one attempt is in flight.
/// **Action:** Append 23 messages without waiting.
/// **Expected:** Contiguous ranges from seq 1, each node covers at least 5 messages,
/// fewer than 5 remain pending, timeline anchors never regress.
#[tokio::test]
async fn test_burst_keeps_ranges_disjoint() {
    let t = engine_with(EngineConfig {
        macro_threshold: 1000,
        ..test_config()
    })
    .await;
    t.summarizer.set_delay(Duration::from_millis(20));
    let conv = t.engine.create_conversation("burst", json!({})).await.unwrap();

    for i in 0..23 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
    }
    t.engine.wait_idle().await;
    t.engine.consolidate_now(&conv.id).await.unwrap();

    let nodes = t.store.list_nodes(&conv.id).await.unwrap();
    assert!(!nodes.is_empty());
    assert_contiguous(&nodes);
    assert!(nodes.iter().all(|n| n.last_seq - n.first_seq + 1 >= 5));
    assert!(nodes.windows(2).all(|w| w[0].timeline_anchor <= w[1].timeline_anchor));
    assert!(t.store.unsummarized_messages(&conv.id).await.unwrap().len() < 5);
}

/// **Test: A summarizer call that exceeds the timeout is abandoned.**
///
/// **Setup:** 50 ms collaborator timeout, summarizer sleeping 300 ms.
/// **Action:** Append 5 messages; then remove the delay and append a 6th.
/// **Expected:** No node after the timeout; one node over 6 messages afterwards.
#[tokio::test]
async fn test_timeout_commits_nothing() {
    let t = engine_with(EngineConfig {
        collaborator_timeout: Duration::from_millis(50),
        ..test_config()
    })
    .await;
    t.summarizer.set_delay(Duration::from_millis(300));
    let conv = t.engine.create_conversation("slow", json!({})).await.unwrap();

    for i in 0..5 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
    }
    t.engine.wait_idle().await;
    assert!(t.store.list_nodes(&conv.id).await.unwrap().is_empty());

    t.summarizer.set_delay(Duration::ZERO);
    t.engine.append_message(&conv.id, message(5)).await.unwrap();
    t.engine.wait_idle().await;

    let nodes = t.store.list_nodes(&conv.id).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!((nodes[0].first_seq, nodes[0].last_seq), (1, 6));
}

/// **Test: Ten MICRO nodes merge into one MACRO node and a saga chapter.**
///
/// **Setup:** Default thresholds (5 / 10).
/// **Action:** Append 50 messages one at a time.
/// **Expected:** One MACRO node covering seq 1..50, no unfolded MICRO node, one chapter.
#[tokio::test]
async fn test_fifty_turns_fold_into_macro() {
    let t = engine().await;
    let conv = t.engine.create_conversation("macro", json!({})).await.unwrap();

    for i in 0..50 {
        t.engine.append_message(&conv.id, message(i)).await.unwrap();
        t.engine.wait_idle().await;
    }

    let macros: Vec<MemoryNode> = t
        .store
        .list_nodes(&conv.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.tier == Tier::Macro)
        .collect();
    assert_eq!(macros.len(), 1);
    assert_eq!((macros[0].first_seq, macros[0].last_seq), (1, 50));
    assert!(t.store.unfolded_nodes(&conv.id, Tier::Micro).await.unwrap().is_empty());

    let saga = t.engine.list_saga(&conv.id).await.unwrap();
    assert_eq!(saga.len(), 1);
    assert_eq!(saga[0].title, "Chapter 1");

    let spine = t.engine.memory_spine(&conv.id).await.unwrap();
    assert!(spine.starts_with("[Macro|"));
    assert_eq!(spine.lines().count(), 1);
}
