//! Failure-injecting store used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::app_error::{AppError, AppResult, StoreFailure};
use crate::local_db_model::Document;
use crate::local_db_state::{DocumentStore, MemoryStore};

/// Wraps a [`MemoryStore`] and fails or slows writes to the collections it is told to.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_writes: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    slow_writes: Mutex<HashMap<String, Duration>>,
    failing_inserts: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_to(&self, collection: &str) {
        self.failing_writes.lock().insert(collection.to_string());
    }

    pub fn fail_reads_from(&self, collection: &str) {
        self.failing_reads.lock().insert(collection.to_string());
    }

    /// Fails writes that would add a new document; overwrites still go through.
    pub fn fail_inserts_to(&self, collection: &str) {
        self.failing_inserts.lock().insert(collection.to_string());
    }

    pub fn delay_writes_to(&self, collection: &str, delay: Duration) {
        self.slow_writes.lock().insert(collection.to_string(), delay);
    }

    pub fn heal(&self) {
        self.failing_writes.lock().clear();
        self.failing_reads.lock().clear();
        self.slow_writes.lock().clear();
        self.failing_inserts.lock().clear();
    }

    fn check(&self, set: &Mutex<HashSet<String>>, collection: &str) -> AppResult<()> {
        if set.lock().contains(collection) {
            return Err(AppError::Internal {
                context: format!("injected failure on '{collection}'"),
                source: StoreFailure::Io("disk unplugged".to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        self.check(&self.failing_reads, collection)?;
        self.inner.get(collection, id).await
    }

    async fn get_all(&self, collection: &str) -> AppResult<Vec<Document>> {
        self.check(&self.failing_reads, collection)?;
        self.inner.get_all(collection).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> AppResult<Document> {
        self.check(&self.failing_writes, collection)?;
        if self.inner.get(collection, id).await?.is_none() {
            self.check(&self.failing_inserts, collection)?;
        }
        let delay = self.slow_writes.lock().get(collection).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.set(collection, id, doc).await
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool> {
        self.check(&self.failing_writes, collection)?;
        self.inner.delete(collection, id).await
    }

    async fn clear(&self, collection: &str) -> AppResult<usize> {
        self.check(&self.failing_writes, collection)?;
        self.inner.clear(collection).await
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
