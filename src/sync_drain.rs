//! Hand-off of pending queue items to a remote peer.
//!
//! The wire protocol is left to the [`SyncTransport`] implementation: it receives
//! a batch of items in causal order and answers with the ids it acknowledged.
//! [`SyncDrainer::drain_once`] is one explicit pass; scheduling passes and
//! backing off between them is the caller's business.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::app_error::AppResult;
use crate::mutation_queue::{MutationQueue, MutationQueueItem};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Delivers `batch` and returns the ids of the items the remote side accepted.
    async fn push(&self, batch: &[MutationQueueItem]) -> Result<Vec<String>, TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub acked: usize,
    pub failed: usize,
    /// Items left alone because they reached the retry ceiling.
    pub skipped: usize,
    /// Items not sent because an earlier item for the same entity is still unsynced.
    pub held: usize,
}

type EntityKey = (String, String);

fn entity_key(item: &MutationQueueItem) -> EntityKey {
    (item.store_name.clone(), item.entity_id.clone())
}

pub struct SyncDrainer<T: SyncTransport> {
    queue: Arc<MutationQueue>,
    transport: T,
    max_retries: u32,
    batch_size: usize,
}

impl<T: SyncTransport> SyncDrainer<T> {
    pub fn new(queue: Arc<MutationQueue>, transport: T, max_retries: u32, batch_size: usize) -> Self {
        Self {
            queue,
            transport,
            max_retries,
            batch_size: batch_size.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends every eligible pending item once, in queue order.
    ///
    /// Nothing overtakes an unsynced earlier mutation of the same entity: once an
    /// item is skipped or not acknowledged, later items for its entity are held
    /// for the next pass, and a batch never carries two items for one entity. A
    /// transport error fails the whole batch and ends the pass.
    pub async fn drain_once(&self) -> AppResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<EntityKey> = HashSet::new();
        let mut batch: Vec<MutationQueueItem> = Vec::new();
        let mut stopped = false;

        for item in self.queue.pending().await? {
            let key = entity_key(&item);
            if batch.len() >= self.batch_size || batch.iter().any(|b| entity_key(b) == key) {
                if !self.send(std::mem::take(&mut batch), &mut blocked, &mut report).await? {
                    stopped = true;
                    break;
                }
            }
            if item.retry_count >= self.max_retries {
                report.skipped += 1;
                blocked.insert(key);
            } else if blocked.contains(&key) {
                report.held += 1;
            } else {
                batch.push(item);
            }
        }
        if !stopped && !batch.is_empty() {
            self.send(batch, &mut blocked, &mut report).await?;
        }

        if report.skipped > 0 {
            warn!(
                "{} queue items reached the retry limit of {}",
                report.skipped, self.max_retries
            );
        }
        info!(
            "Drain pass: {} attempted, {} acked, {} failed, {} skipped, {} held",
            report.attempted, report.acked, report.failed, report.skipped, report.held
        );
        Ok(report)
    }

    /// Pushes one batch; returns `false` when the pass must stop.
    async fn send(
        &self,
        batch: Vec<MutationQueueItem>,
        blocked: &mut HashSet<EntityKey>,
        report: &mut DrainReport,
    ) -> AppResult<bool> {
        report.attempted += batch.len();
        match self.transport.push(&batch).await {
            Ok(acked_ids) => {
                let acked: HashSet<String> = acked_ids.into_iter().collect();
                for item in &batch {
                    if acked.contains(&item.id) {
                        self.queue.mark_synced(&item.id).await?;
                        report.acked += 1;
                    } else {
                        self.queue
                            .mark_failed(&item.id, "not acknowledged by remote")
                            .await?;
                        blocked.insert(entity_key(item));
                        report.failed += 1;
                    }
                }
                Ok(true)
            }
            Err(e) => {
                warn!("Sync batch of {} items failed: {}", batch.len(), e);
                for item in &batch {
                    self.queue.mark_failed(&item.id, e.to_string()).await?;
                    report.failed += 1;
                }
                Ok(false)
            }
        }
    }
}
