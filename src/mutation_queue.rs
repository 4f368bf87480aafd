//! Durable log of pending offline writes.
//!
//! One queue is shared by every repository of a storage instance. Items live in
//! the reserved [`MUTATION_QUEUE_COLLECTION`], so their durability comes from the
//! same [`DocumentStore`] the entities use. The queue only keeps bookkeeping;
//! sending items anywhere is the job of [`crate::sync_drain::SyncDrainer`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app_error::{AppError, AppResult};
use crate::ids::generate_id;
use crate::local_db_model::Document;
use crate::local_db_state::DocumentStore;

pub const MUTATION_QUEUE_COLLECTION: &str = "mutationQueue";
const ITEM_ID_PREFIX: &str = "mut";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueueItem {
    pub id: String,
    pub operation: MutationOperation,
    pub store_name: String,
    pub entity_id: String,
    /// Full post-mutation document; absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    pub timestamp: DateTime<Utc>,
    /// Insertion order within this queue.
    #[serde(default)]
    pub sequence: u64,
    pub synced: bool,
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub synced: usize,
    /// Pending items that failed at least once.
    pub failed: usize,
}

pub struct MutationQueue {
    store: Arc<dyn DocumentStore>,
    next_sequence: AtomicU64,
}

impl MutationQueue {
    /// Opens the queue over `store`, resuming the sequence after any persisted items.
    pub async fn open(store: Arc<dyn DocumentStore>) -> AppResult<Self> {
        let existing = store.get_all(MUTATION_QUEUE_COLLECTION).await?;
        let mut last = 0;
        for doc in &existing {
            let item: MutationQueueItem = doc.to_entity()?;
            last = last.max(item.sequence);
        }
        info!("Mutation queue opened with {} persisted items", existing.len());
        Ok(Self {
            store,
            next_sequence: AtomicU64::new(last + 1),
        })
    }

    pub async fn enqueue_create(
        &self,
        store_name: &str,
        entity_id: &str,
        data: Document,
    ) -> AppResult<MutationQueueItem> {
        self.enqueue(MutationOperation::Create, store_name, entity_id, Some(data))
            .await
    }

    pub async fn enqueue_update(
        &self,
        store_name: &str,
        entity_id: &str,
        data: Document,
    ) -> AppResult<MutationQueueItem> {
        self.enqueue(MutationOperation::Update, store_name, entity_id, Some(data))
            .await
    }

    pub async fn enqueue_delete(
        &self,
        store_name: &str,
        entity_id: &str,
    ) -> AppResult<MutationQueueItem> {
        self.enqueue(MutationOperation::Delete, store_name, entity_id, None)
            .await
    }

    async fn enqueue(
        &self,
        operation: MutationOperation,
        store_name: &str,
        entity_id: &str,
        data: Option<Document>,
    ) -> AppResult<MutationQueueItem> {
        let item = MutationQueueItem {
            id: generate_id(ITEM_ID_PREFIX),
            operation,
            store_name: store_name.to_string(),
            entity_id: entity_id.to_string(),
            data,
            timestamp: Utc::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            synced: false,
            retry_count: 0,
            error: None,
        };
        self.save(&item).await?;
        debug!(
            "Queued {:?} for {}/{} as {}",
            operation, store_name, entity_id, item.id
        );
        Ok(item)
    }

    async fn save(&self, item: &MutationQueueItem) -> AppResult<()> {
        let doc = Document::from_serializable(item)?;
        self.store
            .set(MUTATION_QUEUE_COLLECTION, &item.id, doc)
            .await?;
        Ok(())
    }

    /// Every item, oldest first.
    pub async fn all(&self) -> AppResult<Vec<MutationQueueItem>> {
        let docs = self.store.get_all(MUTATION_QUEUE_COLLECTION).await?;
        let mut items = docs
            .iter()
            .map(|doc| doc.to_entity::<MutationQueueItem>())
            .collect::<AppResult<Vec<_>>>()?;
        items.sort_by_key(|item| item.sequence);
        Ok(items)
    }

    pub async fn pending(&self) -> AppResult<Vec<MutationQueueItem>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|item| !item.synced)
            .collect())
    }

    pub async fn pending_for(&self, store_name: &str) -> AppResult<Vec<MutationQueueItem>> {
        Ok(self
            .pending()
            .await?
            .into_iter()
            .filter(|item| item.store_name == store_name)
            .collect())
    }

    pub async fn get(&self, item_id: &str) -> AppResult<MutationQueueItem> {
        match self.store.get(MUTATION_QUEUE_COLLECTION, item_id).await? {
            Some(doc) => doc.to_entity(),
            None => Err(AppError::not_found(MUTATION_QUEUE_COLLECTION, item_id)),
        }
    }

    pub async fn mark_synced(&self, item_id: &str) -> AppResult<MutationQueueItem> {
        let mut item = self.get(item_id).await?;
        item.synced = true;
        item.error = None;
        self.save(&item).await?;
        Ok(item)
    }

    /// Records a failed delivery attempt. The item stays pending.
    pub async fn mark_failed(
        &self,
        item_id: &str,
        error: impl Into<String>,
    ) -> AppResult<MutationQueueItem> {
        let mut item = self.get(item_id).await?;
        item.retry_count += 1;
        item.error = Some(error.into());
        self.save(&item).await?;
        Ok(item)
    }

    /// Purges items already acknowledged by the remote side.
    pub async fn clear_synced(&self) -> AppResult<usize> {
        let mut removed = 0;
        for item in self.all().await?.into_iter().filter(|item| item.synced) {
            if self.store.delete(MUTATION_QUEUE_COLLECTION, &item.id).await? {
                removed += 1;
            }
        }
        info!("Compacted {} synced queue items", removed);
        Ok(removed)
    }

    /// Drops every item, synced or not.
    pub async fn clear_all(&self) -> AppResult<usize> {
        self.store.clear(MUTATION_QUEUE_COLLECTION).await
    }

    pub async fn stats(&self) -> AppResult<QueueStats> {
        let mut stats = QueueStats::default();
        for item in self.all().await? {
            if item.synced {
                stats.synced += 1;
            } else {
                stats.pending += 1;
                if item.retry_count > 0 {
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}
