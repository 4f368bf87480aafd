//! # Jobsite Offline Core
//!
//! Local persistence and sync bookkeeping for construction-project apps that
//! must keep working without a network. Built on LMDB (Lightning Memory-Mapped
//! Database) with an async API on top of tokio.
//!
//! ## Features
//!
//! - **Named collections**: one LMDB database per entity family plus the reserved
//!   `mutationQueue` and `activityLog` collections
//! - **Repositories**: typed CRUD that stamps `createdAt`/`updatedAt`/`version` and
//!   never exposes a write without its queue entry
//! - **Mutation queue**: durable outbox with retry bookkeeping and a pluggable drain
//! - **Activity log**: append-only project timeline with a homeowner-safe view
//! - **Crew sessions**: at most one active session per device
//!
//! ## Quick Start
//!
//! ```no_run
//! use jobsite_offline_core::{CoreConfig, OfflineCore, ProjectDraft, ProjectStatus};
//!
//! # async fn run() -> jobsite_offline_core::AppResult<()> {
//! let core = OfflineCore::open(CoreConfig::with_db_path("jobsite")).await?;
//! let mutations = core.project_mutations();
//!
//! let project = mutations.create_project(ProjectDraft::named("Kitchen Remodel")).await?;
//! mutations.update_project_status(&project.id, ProjectStatus::InProgress).await?;
//!
//! let pending = core.queue().pending().await?;
//! assert_eq!(pending.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod activity_log;
pub mod app_error;
pub mod config;
pub mod entities;
pub mod entity_repository;
pub mod ids;
pub mod local_db_model;
pub mod local_db_state;
pub mod mutation_queue;
pub mod project_mutations;
pub mod session_registry;
pub mod sync_drain;
mod test;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use log::info;

pub use crate::activity_log::{ActivityEvent, ActivityLog, AuditOutcome};
pub use crate::app_error::{AppError, AppResult};
pub use crate::config::CoreConfig;
pub use crate::entities::{
    Customer, CustomerDraft, LineItem, LineItemDraft, Photo, PhotoDraft, Project, ProjectDraft,
    ProjectStatus,
};
pub use crate::entity_repository::{DocumentLock, EntityRepository, WriteLocks};
pub use crate::local_db_model::{Document, Entity, Metadata};
pub use crate::local_db_state::{DocumentStore, LmdbStore, MemoryStore};
pub use crate::mutation_queue::{MutationOperation, MutationQueue, MutationQueueItem};
pub use crate::project_mutations::ProjectMutations;
pub use crate::session_registry::{CrewSession, SessionRegistry};
pub use crate::sync_drain::{DrainReport, SyncDrainer, SyncTransport, TransportError};

/// Wiring for one storage instance.
///
/// Owns the single queue, activity log, write-lock table and session registry
/// that every repository built from it shares.
pub struct OfflineCore {
    config: CoreConfig,
    store: Arc<dyn DocumentStore>,
    queue: Arc<MutationQueue>,
    activity: Arc<ActivityLog>,
    locks: Arc<WriteLocks>,
    sessions: Arc<SessionRegistry>,
}

impl OfflineCore {
    /// Opens the LMDB environment described by `config`.
    ///
    /// A store that cannot be opened at all is reported here, once, as
    /// [`AppError::StorageUnavailable`].
    pub async fn open(config: CoreConfig) -> AppResult<Self> {
        config.validate()?;
        let store = LmdbStore::new(config.clone());
        store.ensure_open().await?;
        info!("✅ Offline core opened at {}", store.path().display());
        Self::with_store(config, Arc::new(store)).await
    }

    /// Builds the core over an already constructed store.
    pub async fn with_store(config: CoreConfig, store: Arc<dyn DocumentStore>) -> AppResult<Self> {
        let queue = Arc::new(MutationQueue::open(Arc::clone(&store)).await?);
        let activity = Arc::new(ActivityLog::open(Arc::clone(&store)).await?);
        let locks = Arc::new(WriteLocks::new());
        let sessions = Arc::new(SessionRegistry::new(
            EntityRepository::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&locks)),
            Arc::clone(&activity),
        ));
        Ok(Self {
            config,
            store,
            queue,
            activity,
            locks,
            sessions,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Raw collection access, bypassing repositories and the queue.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn repository<T: Entity>(&self) -> EntityRepository<T> {
        EntityRepository::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::clone(&self.locks),
        )
    }

    pub fn session_registry(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn project_mutations(&self) -> ProjectMutations {
        ProjectMutations::new(
            self.repository(),
            self.repository(),
            self.repository(),
            Arc::clone(&self.activity),
        )
    }

    /// A drainer using the configured retry ceiling and batch size.
    pub fn drainer<T: SyncTransport>(&self, transport: T) -> SyncDrainer<T> {
        SyncDrainer::new(
            Arc::clone(&self.queue),
            transport,
            self.config.max_sync_retries,
            self.config.drain_batch_size,
        )
    }
}
