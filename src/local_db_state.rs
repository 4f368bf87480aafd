//! Named-collection document storage.
//!
//! [`DocumentStore`] is the seam every higher layer talks to. [`LmdbStore`] keeps
//! one LMDB named database per collection inside a single environment;
//! [`MemoryStore`] is a non-durable stand-in for tests and throwaway sessions.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;

use crate::app_error::{AppError, AppResult, StoreFailure};
use crate::config::CoreConfig;
use crate::local_db_model::Document;

/// In-process predicate evaluated over a full collection scan.
pub type DocumentFilter<'a> = &'a (dyn Fn(&Document) -> bool + Send + Sync);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>>;

    /// Every document of the collection, ordered by id.
    async fn get_all(&self, collection: &str) -> AppResult<Vec<Document>>;

    async fn query(
        &self,
        collection: &str,
        predicate: DocumentFilter<'_>,
    ) -> AppResult<Vec<Document>> {
        let docs = self.get_all(collection).await?;
        Ok(docs.into_iter().filter(|doc| predicate(doc)).collect())
    }

    /// Upsert. The stored `id` field is rewritten to `id`; the stored document is returned.
    async fn set(&self, collection: &str, id: &str, doc: Document) -> AppResult<Document>;

    /// Returns `false` when nothing was stored under `id`.
    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool>;

    /// Removes every document of the collection and returns how many there were.
    async fn clear(&self, collection: &str) -> AppResult<usize>;
}

struct LmdbHandle {
    env: Environment,
    dbs: Mutex<HashMap<String, Database>>,
}

impl LmdbHandle {
    fn db(&self, collection: &str) -> AppResult<Database> {
        let mut dbs = self.dbs.lock();
        if let Some(db) = dbs.get(collection) {
            return Ok(*db);
        }
        let db = self.env.create_db(Some(collection), DatabaseFlags::empty())?;
        debug!("Opened collection '{}'", collection);
        dbs.insert(collection.to_string(), db);
        Ok(db)
    }
}

/// Durable store backed by an LMDB environment at `<db_path>.lmdb`.
///
/// The environment is opened lazily and at most once: concurrent callers of
/// [`LmdbStore::ensure_open`] all wait on the same open attempt.
pub struct LmdbStore {
    config: CoreConfig,
    handle: OnceCell<Arc<LmdbHandle>>,
    opens: AtomicUsize,
}

impl LmdbStore {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            handle: OnceCell::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.config.lmdb_dir()
    }

    /// Number of physical environment opens performed so far (0 or 1).
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub async fn ensure_open(&self) -> AppResult<()> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&self) -> AppResult<Arc<LmdbHandle>> {
        let handle = self
            .handle
            .get_or_try_init(|| async move {
                let dir = self.config.lmdb_dir();
                let map_size = self.config.map_size_bytes;
                let max_dbs = self.config.max_collections;
                self.opens.fetch_add(1, Ordering::SeqCst);
                info!("Opening LMDB environment at: {}", dir.display());

                let opened = tokio::task::spawn_blocking(move || {
                    std::fs::create_dir_all(&dir).map_err(|e| {
                        AppError::StorageUnavailable(format!(
                            "cannot create {}: {e}",
                            dir.display()
                        ))
                    })?;
                    Environment::new()
                        .set_max_dbs(max_dbs)
                        .set_map_size(map_size)
                        .open(&dir)
                        .map_err(|e| {
                            AppError::StorageUnavailable(format!(
                                "cannot open LMDB environment at {}: {e}",
                                dir.display()
                            ))
                        })
                })
                .await
                .map_err(|e| AppError::StorageUnavailable(format!("open task failed: {e}")))?;

                match opened {
                    Ok(env) => {
                        info!("✅ LMDB environment ready");
                        Ok(Arc::new(LmdbHandle {
                            env,
                            dbs: Mutex::new(HashMap::new()),
                        }))
                    }
                    Err(e) => {
                        warn!("❌ Failed to open LMDB environment: {}", e);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    async fn with_handle<R, F>(&self, op: F) -> AppResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&LmdbHandle) -> AppResult<R> + Send + 'static,
    {
        let handle = self.handle().await?;
        tokio::task::spawn_blocking(move || op(&handle)).await?
    }
}

#[async_trait]
impl DocumentStore for LmdbStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.with_handle(move |h| {
            let db = h.db(&collection)?;
            let txn = h.env.begin_ro_txn()?;
            let found = match txn.get(db, &id) {
                Ok(bytes) => Some(Document::from_bytes(bytes)?),
                Err(lmdb::Error::NotFound) => None,
                Err(e) => return Err(e.into()),
            };
            Ok(found)
        })
        .await
    }

    async fn get_all(&self, collection: &str) -> AppResult<Vec<Document>> {
        let collection = collection.to_string();
        self.with_handle(move |h| {
            let db = h.db(&collection)?;
            let txn = h.env.begin_ro_txn()?;
            let mut docs = Vec::new();
            {
                let mut cursor = txn.open_ro_cursor(db)?;
                for (_key, value) in cursor.iter_start() {
                    docs.push(Document::from_bytes(value)?);
                }
            }
            Ok(docs)
        })
        .await
    }

    async fn set(&self, collection: &str, id: &str, mut doc: Document) -> AppResult<Document> {
        if id.is_empty() {
            return Err(AppError::Validation("document id must not be empty".to_string()));
        }
        doc.set_id(id);
        let bytes = doc.to_bytes()?;
        let collection = collection.to_string();
        let id = id.to_string();
        self.with_handle(move |h| {
            let db = h.db(&collection)?;
            let mut txn = h.env.begin_rw_txn()?;
            txn.put(db, &id, &bytes, WriteFlags::empty())?;
            txn.commit()?;
            Ok(())
        })
        .await?;
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.with_handle(move |h| {
            let db = h.db(&collection)?;
            let mut txn = h.env.begin_rw_txn()?;
            match txn.del(db, &id, None) {
                Ok(()) => {
                    txn.commit()?;
                    Ok(true)
                }
                Err(lmdb::Error::NotFound) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn clear(&self, collection: &str) -> AppResult<usize> {
        let collection = collection.to_string();
        self.with_handle(move |h| {
            let db = h.db(&collection)?;
            let mut txn = h.env.begin_rw_txn()?;
            let count = txn.open_ro_cursor(db)?.iter_start().count();
            txn.clear_db(db)?;
            txn.commit()?;
            info!("Cleared {} documents from '{}'", count, collection);
            Ok(count)
        })
        .await
    }
}

/// Non-durable store keeping every collection in memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn get_all(&self, collection: &str) -> AppResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set(&self, collection: &str, id: &str, mut doc: Document) -> AppResult<Document> {
        if id.is_empty() {
            return Err(AppError::Validation("document id must not be empty".to_string()));
        }
        doc.set_id(id);
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn clear(&self, collection: &str) -> AppResult<usize> {
        Ok(self
            .collections
            .write()
            .remove(collection)
            .map(|docs| docs.len())
            .unwrap_or(0))
    }
}

/// Maps a failed write to the storage layer so callers get the uniform `Internal` shape.
pub(crate) fn storage_failure(context: impl Into<String>, err: AppError) -> AppError {
    match err {
        AppError::Internal { .. } | AppError::StorageUnavailable(_) => err,
        other => AppError::Internal {
            context: context.into(),
            source: StoreFailure::Nested(Box::new(other)),
        },
    }
}
