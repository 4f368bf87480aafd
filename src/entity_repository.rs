//! Generic CRUD over one entity collection.
//!
//! The repository is the only writer of its collection. Every accepted create,
//! update or delete writes the store first and then appends exactly one
//! [`MutationQueue`] item; if the append fails the store write is undone, so a
//! document is never visible as written without its queue entry.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::app_error::{AppError, AppResult};
use crate::ids::generate_id;
use crate::local_db_model::{Document, Entity, Metadata, ID_FIELD, METADATA_FIELD};
use crate::local_db_state::{storage_failure, DocumentStore};
use crate::mutation_queue::MutationQueue;

const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Per-document write locks shared by all repositories of one storage instance.
///
/// Two writers of the same `collection/id` run one after the other instead of
/// interleaving their read-merge-write.
#[derive(Default)]
pub struct WriteLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, collection: &str, id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            if slots.len() > LOCK_PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(
                slots
                    .entry(format!("{collection}/{id}"))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        slot.lock_owned().await
    }
}

/// Exclusive write access to one document, released on drop.
pub struct DocumentLock {
    collection: &'static str,
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl DocumentLock {
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub struct EntityRepository<T: Entity> {
    store: Arc<dyn DocumentStore>,
    queue: Arc<MutationQueue>,
    locks: Arc<WriteLocks>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntityRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            locks: Arc::clone(&self.locks),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntityRepository<T> {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queue: Arc<MutationQueue>,
        locks: Arc<WriteLocks>,
    ) -> Self {
        Self {
            store,
            queue,
            locks,
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    pub async fn create(&self, draft: T::Draft) -> AppResult<T> {
        let (entity, _lock) = self.create_locked(draft).await?;
        Ok(entity)
    }

    /// Creates the document and hands back its write lock still held, so the
    /// caller can finish follow-up work before anyone else touches it.
    pub async fn create_locked(&self, draft: T::Draft) -> AppResult<(T, DocumentLock)> {
        let id = generate_id(T::ID_PREFIX);
        let mut doc = Document::from_serializable(&draft)?;
        doc.remove(METADATA_FIELD);
        doc.set_id(&id);
        doc.insert(METADATA_FIELD, serde_json::to_value(Metadata::fresh())?);
        let entity = decode_candidate::<T>(&doc)?;

        let lock = self.lock(&id).await;
        let stored = self
            .store
            .set(T::COLLECTION, &id, doc)
            .await
            .map_err(|e| storage_failure(format!("failed to write {}/{}", T::COLLECTION, id), e))?;

        if let Err(e) = self.queue.enqueue_create(T::COLLECTION, &id, stored).await {
            self.undo_create(&id).await;
            return Err(AppError::internal(
                format!("failed to queue create of {}/{}", T::COLLECTION, id),
                e,
            ));
        }
        debug!("Created {}/{}", T::COLLECTION, id);
        Ok((entity, lock))
    }

    /// Waits for exclusive write access to `id`.
    ///
    /// While the returned lock is alive, writes to `id` from any repository
    /// sharing these [`WriteLocks`] wait; use the `*_locked` methods to write
    /// through it.
    pub async fn lock(&self, id: &str) -> DocumentLock {
        DocumentLock {
            collection: T::COLLECTION,
            id: id.to_string(),
            _guard: self.locks.acquire(T::COLLECTION, id).await,
        }
    }

    /// Shallow-merges `patch` over the stored document. Last write wins.
    ///
    /// `id` and `metadata` keys in the patch are ignored.
    pub async fn update(&self, id: &str, patch: JsonValue) -> AppResult<T> {
        let lock = self.lock(id).await;
        self.update_locked(&lock, patch, None).await
    }

    /// Like [`EntityRepository::update`], but rejects the patch with
    /// [`AppError::VersionConflict`] unless the stored version is `expected_version`.
    pub async fn update_versioned(
        &self,
        id: &str,
        expected_version: u64,
        patch: JsonValue,
    ) -> AppResult<T> {
        let lock = self.lock(id).await;
        self.update_locked(&lock, patch, Some(expected_version)).await
    }

    /// [`EntityRepository::update`] through a lock the caller already holds.
    pub async fn update_locked(
        &self,
        lock: &DocumentLock,
        patch: JsonValue,
        expected_version: Option<u64>,
    ) -> AppResult<T> {
        let id = self.locked_id(lock)?;
        let mut patch = match patch {
            JsonValue::Object(map) => map,
            _ => {
                return Err(AppError::Validation(
                    "update patch must be a JSON object".to_string(),
                ))
            }
        };
        patch.remove(ID_FIELD);
        patch.remove(METADATA_FIELD);

        let existing = self.load(id).await?;
        let current = decode_stored::<T>(&existing)?;
        let version = current.metadata().version;
        if let Some(expected) = expected_version {
            if expected != version {
                return Err(AppError::VersionConflict {
                    collection: T::COLLECTION.to_string(),
                    id: id.to_string(),
                    expected,
                    actual: version,
                });
            }
        }

        let mut merged = existing.clone();
        merged.merge(patch);
        merged.set_id(id);
        merged.insert(
            METADATA_FIELD,
            serde_json::to_value(current.metadata().bumped())?,
        );
        let entity = decode_candidate::<T>(&merged)?;

        let stored = self
            .store
            .set(T::COLLECTION, id, merged)
            .await
            .map_err(|e| storage_failure(format!("failed to write {}/{}", T::COLLECTION, id), e))?;

        if let Err(e) = self.queue.enqueue_update(T::COLLECTION, id, stored).await {
            self.restore(id, existing).await;
            return Err(AppError::internal(
                format!("failed to queue update of {}/{}", T::COLLECTION, id),
                e,
            ));
        }
        debug!("Updated {}/{} to version {}", T::COLLECTION, id, version + 1);
        Ok(entity)
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let lock = self.lock(id).await;
        self.delete_locked(&lock).await
    }

    /// [`EntityRepository::delete`] through a lock the caller already holds.
    pub async fn delete_locked(&self, lock: &DocumentLock) -> AppResult<()> {
        let id = self.locked_id(lock)?;
        let existing = self.load(id).await?;

        let removed = self
            .store
            .delete(T::COLLECTION, id)
            .await
            .map_err(|e| storage_failure(format!("failed to delete {}/{}", T::COLLECTION, id), e))?;
        if !removed {
            return Err(AppError::not_found(T::COLLECTION, id));
        }

        if let Err(e) = self.queue.enqueue_delete(T::COLLECTION, id).await {
            self.restore(id, existing).await;
            return Err(AppError::internal(
                format!("failed to queue delete of {}/{}", T::COLLECTION, id),
                e,
            ));
        }
        debug!("Deleted {}/{}", T::COLLECTION, id);
        Ok(())
    }

    /// Fails with [`AppError::NotFound`] when absent.
    pub async fn get(&self, id: &str) -> AppResult<T> {
        let doc = self.load(id).await?;
        decode_stored(&doc)
    }

    pub async fn find(&self, id: &str) -> AppResult<Option<T>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(doc) => Ok(Some(decode_stored(&doc)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> AppResult<Vec<T>> {
        self.store
            .get_all(T::COLLECTION)
            .await?
            .iter()
            .map(decode_stored::<T>)
            .collect()
    }

    /// Pure read; never touches the mutation queue.
    pub async fn query<F>(&self, predicate: F) -> AppResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|entity| predicate(entity))
            .collect())
    }

    pub async fn count(&self) -> AppResult<usize> {
        Ok(self.store.get_all(T::COLLECTION).await?.len())
    }

    fn locked_id<'l>(&self, lock: &'l DocumentLock) -> AppResult<&'l str> {
        if lock.collection != T::COLLECTION {
            return Err(AppError::Validation(format!(
                "lock for {}/{} used on collection {}",
                lock.collection,
                lock.id,
                T::COLLECTION
            )));
        }
        Ok(&lock.id)
    }

    async fn load(&self, id: &str) -> AppResult<Document> {
        self.store
            .get(T::COLLECTION, id)
            .await?
            .ok_or_else(|| AppError::not_found(T::COLLECTION, id))
    }

    async fn undo_create(&self, id: &str) {
        if let Err(e) = self.store.delete(T::COLLECTION, id).await {
            error!(
                "Could not roll back unqueued create of {}/{}: {}",
                T::COLLECTION,
                id,
                e
            );
        } else {
            warn!("Rolled back unqueued create of {}/{}", T::COLLECTION, id);
        }
    }

    async fn restore(&self, id: &str, previous: Document) {
        if let Err(e) = self.store.set(T::COLLECTION, id, previous).await {
            error!(
                "Could not restore {}/{} after queue failure: {}",
                T::COLLECTION,
                id,
                e
            );
        } else {
            warn!("Restored {}/{} after queue failure", T::COLLECTION, id);
        }
    }
}

/// A document built from caller input; shape errors are the caller's fault.
fn decode_candidate<T: Entity>(doc: &Document) -> AppResult<T> {
    serde_json::from_value(doc.clone().into_value()).map_err(|e| {
        AppError::Validation(format!("invalid {} document: {e}", T::COLLECTION))
    })
}

/// A document read back from storage; shape errors mean corruption.
fn decode_stored<T: Entity>(doc: &Document) -> AppResult<T> {
    doc.to_entity()
}
