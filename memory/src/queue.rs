//! Conversation job queues.
//!
//! Each conversation gets one unbounded queue drained by one worker task, so its
//! jobs run strictly in submission order. Workers share a semaphore that bounds
//! how many conversations make progress at once. A worker whose queue stays empty
//! for the idle timeout removes its queue and exits; the next job respawns it. Consolidation triggers are
//! coalesced: while one is queued, further triggers are dropped, since the queued
//! attempt re-reads the pending counts when it runs.

use crate::consolidator::{ConsolidationOutcome, Consolidator};
use crate::locks::ConversationLocks;
use crate::snapshot::Snapshotter;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(crate) enum Job {
    /// Snapshot after `message_id`; `None` carries the current state forward.
    Snapshot {
        message_id: i64,
        state: Option<Value>,
    },
    Consolidate,
}

/// Everything a worker needs to run jobs.
pub(crate) struct JobRunner {
    pub(crate) snapshotter: Snapshotter,
    pub(crate) consolidator: Consolidator,
    pub(crate) locks: Arc<ConversationLocks>,
}

impl JobRunner {
    async fn run(&self, conversation_id: &str, job: Job) {
        match job {
            Job::Snapshot { message_id, state } => {
                let lock = self.locks.get(conversation_id);
                let _writer = lock.writer.lock().await;
                let state = match state {
                    Some(state) => state,
                    None => match self.snapshotter.current_state(conversation_id).await {
                        Ok(state) => state,
                        Err(e) => {
                            error!(conversation_id = %conversation_id, message_id, error = %e, "Cannot resolve state for snapshot");
                            return;
                        }
                    },
                };
                if let Err(e) = self.snapshotter.commit(conversation_id, message_id, state).await {
                    error!(conversation_id = %conversation_id, message_id, error = %e, "Snapshot commit failed");
                }
            }
            Job::Consolidate => match self.consolidator.attempt(conversation_id).await {
                Ok(ConsolidationOutcome::Consolidated { nodes }) => {
                    info!(conversation_id = %conversation_id, nodes = nodes.len(), "Consolidation committed");
                }
                Ok(ConsolidationOutcome::Deferred { tier }) => {
                    warn!(conversation_id = %conversation_id, tier = %tier, "Consolidation deferred to next trigger");
                }
                Ok(other) => debug!(conversation_id = %conversation_id, outcome = ?other, "Consolidation skipped"),
                Err(e) => error!(conversation_id = %conversation_id, error = %e, "Consolidation failed"),
            },
        }
    }
}

/// Count of submitted-but-unfinished jobs, with a waiter for zero.
#[derive(Default)]
struct IdleTracker {
    in_flight: AtomicUsize,
    notify: Notify,
}

impl IdleTracker {
    fn start(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ConversationQueue {
    sender: mpsc::UnboundedSender<Job>,
    consolidate_queued: Arc<AtomicBool>,
}

/// State owned by one conversation's worker task.
struct Worker {
    conversation_id: String,
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    idle: Arc<IdleTracker>,
    queues: Arc<DashMap<String, ConversationQueue>>,
    consolidate_queued: Arc<AtomicBool>,
    idle_timeout: Duration,
}

pub(crate) struct JobQueues {
    queues: Arc<DashMap<String, ConversationQueue>>,
    permits: Arc<Semaphore>,
    idle: Arc<IdleTracker>,
    runner: Arc<JobRunner>,
    worker_idle_timeout: Duration,
}

impl JobQueues {
    pub(crate) fn new(runner: JobRunner, max_workers: usize, worker_idle_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(max_workers)),
            idle: Arc::new(IdleTracker::default()),
            runner: Arc::new(runner),
            worker_idle_timeout,
        }
    }

    pub(crate) fn submit(&self, conversation_id: &str, job: Job) {
        let queue = self
            .queues
            .entry(conversation_id.to_string())
            .or_insert_with(|| self.spawn_worker(conversation_id.to_string()));

        if matches!(job, Job::Consolidate) && queue.consolidate_queued.swap(true, Ordering::SeqCst) {
            debug!(conversation_id = %conversation_id, "Consolidation already queued");
            return;
        }

        self.idle.start();
        if let Err(e) = queue.sender.send(job) {
            // Worker gone; the job is dropped and the next trigger retries.
            self.idle.finish();
            if matches!(e.0, Job::Consolidate) {
                queue.consolidate_queued.store(false, Ordering::SeqCst);
            }
            error!(conversation_id = %conversation_id, "Conversation worker stopped; job dropped");
        }
    }

    fn spawn_worker(&self, conversation_id: String) -> ConversationQueue {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let consolidate_queued = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            conversation_id,
            runner: self.runner.clone(),
            permits: self.permits.clone(),
            idle: self.idle.clone(),
            queues: self.queues.clone(),
            consolidate_queued: consolidate_queued.clone(),
            idle_timeout: self.worker_idle_timeout,
        };
        tokio::spawn(Self::process_queue_loop(receiver, worker));
        ConversationQueue {
            sender,
            consolidate_queued,
        }
    }

    async fn process_queue_loop(mut receiver: mpsc::UnboundedReceiver<Job>, worker: Worker) {
        let conversation_id = worker.conversation_id.as_str();
        debug!(conversation_id = %conversation_id, "Conversation worker started");
        loop {
            let job = match tokio::time::timeout(worker.idle_timeout, receiver.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    // Submitters send while holding the map entry, so an empty queue
                    // seen under the same entry lock cannot receive another job.
                    let retired = worker
                        .queues
                        .remove_if(conversation_id, |_, queue| {
                            Arc::ptr_eq(&queue.consolidate_queued, &worker.consolidate_queued)
                                && receiver.is_empty()
                        })
                        .is_some();
                    if retired {
                        worker.runner.locks.prune(conversation_id);
                        break;
                    }
                    continue;
                }
            };
            let Ok(_permit) = worker.permits.clone().acquire_owned().await else {
                worker.idle.finish();
                break;
            };
            if matches!(job, Job::Consolidate) {
                worker.consolidate_queued.store(false, Ordering::SeqCst);
            }
            worker.runner.run(conversation_id, job).await;
            worker.idle.finish();
        }
        debug!(conversation_id = %conversation_id, "Conversation worker stopped");
    }

    pub(crate) fn consolidator(&self) -> &Consolidator {
        &self.runner.consolidator
    }

    /// Conversations that currently have a live worker.
    pub(crate) fn active_workers(&self) -> usize {
        self.queues.len()
    }

    /// Drops the conversation's queue; its worker exits after draining queued jobs.
    pub(crate) fn remove(&self, conversation_id: &str) {
        self.queues.remove(conversation_id);
    }

    pub(crate) async fn wait_idle(&self) {
        self.idle.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_tracker_waits_for_zero() {
        let tracker = Arc::new(IdleTracker::default());
        tracker.wait().await;

        tracker.start();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tracker.finish();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
