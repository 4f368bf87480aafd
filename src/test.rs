//! # End-to-End Test Suite for Jobsite Offline Core
//!
//! Scenario tests that run the whole core over a real LMDB environment in a
//! temporary directory. Component behaviour is covered by the unit tests next to
//! each module; this suite checks that the pieces agree with each other once
//! wired together through [`crate::OfflineCore`].
//!
//! ## Test Categories
//!
//! ### 1. Lifecycle Tests
//! - Metadata stamping on create and update
//! - One queue entry per successful write, none for a missing id
//! - Round trip from repository to raw collection
//!
//! ### 2. Project Timeline Tests
//! - The Kitchen Remodel scenario from creation to deletion
//! - Homeowner view never shows internal events
//!
//! ### 3. Session Tests
//! - Serial crew switches leave one active record on disk
//!
//! ### 4. Persistence and Sync Tests
//! - Queue, activity log and sessions survive a reopen
//! - Draining the queue through a transport
//! - Startup failure surfaces as `StorageUnavailable`
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test test_e2e_
//! ```

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::activity_log::is_internal_event;
    use crate::local_db_model::Document;
    use crate::sync_drain::{SyncTransport, TransportError};
    use crate::{
        AppError, CoreConfig, Customer, CustomerDraft, Entity, LineItemDraft, MutationOperation,
        MutationQueueItem, OfflineCore, PhotoDraft, Project, ProjectDraft, ProjectStatus,
    };

    fn config_in(dir: &TempDir) -> CoreConfig {
        let path = dir.path().join("jobsite").to_string_lossy().to_string();
        CoreConfig::with_db_path(path)
    }

    async fn open_core(dir: &TempDir) -> OfflineCore {
        crate::test_support::init_logging();
        OfflineCore::open(config_in(dir)).await.unwrap()
    }

    struct AckEverything;

    #[async_trait]
    impl SyncTransport for AckEverything {
        async fn push(&self, batch: &[MutationQueueItem]) -> Result<Vec<String>, TransportError> {
            Ok(batch.iter().map(|item| item.id.clone()).collect())
        }
    }

    #[tokio::test]
    async fn test_e2e_create_and_update_stamp_metadata() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let customers = core.repository::<Customer>();

        let created = customers
            .create(CustomerDraft {
                name: "Dana Whitfield".to_string(),
                email: Some("dana@example.com".to_string()),
                phone: None,
            })
            .await
            .unwrap();
        assert_eq!(created.metadata.version, 1);
        assert_eq!(created.metadata.created_at, created.metadata.updated_at);
        assert!(created.id.starts_with("cust_"));

        let updated = customers
            .update(&created.id, json!({"phone": "555-0100"}))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.metadata.version, 2);
        assert_eq!(updated.metadata.created_at, created.metadata.created_at);
        assert!(updated.metadata.updated_at > created.metadata.updated_at);
        assert_eq!(updated.email, created.email);

        let items = core.queue().pending_for(Customer::COLLECTION).await.unwrap();
        let ops: Vec<_> = items.iter().map(|i| i.operation).collect();
        assert_eq!(ops, vec![MutationOperation::Create, MutationOperation::Update]);
        assert!(items.iter().all(|i| i.entity_id == created.id));
    }

    #[tokio::test]
    async fn test_e2e_missing_id_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let projects = core.repository::<Project>();

        let update = projects.update("proj_0_missing", json!({"name": "x"})).await;
        assert!(matches!(update, Err(AppError::NotFound { .. })));
        let delete = projects.delete("proj_0_missing").await;
        assert!(matches!(delete, Err(AppError::NotFound { .. })));

        assert!(core.queue().all().await.unwrap().is_empty());
        assert!(core.store().get_all(Project::COLLECTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_e2e_round_trip_matches_raw_document() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let projects = core.repository::<Project>();

        let draft = ProjectDraft {
            name: "Basement Finish".to_string(),
            status: ProjectStatus::Planning,
            customer_id: Some("cust_1".to_string()),
            address: Some("12 Elm St".to_string()),
        };
        let project = projects.create(draft.clone()).await.unwrap();

        let raw = core
            .store()
            .get(Project::COLLECTION, &project.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.id(), Some(project.id.as_str()));
        assert_eq!(raw, Document::from_serializable(&project).unwrap());

        let mut without_envelope = raw.clone();
        without_envelope.remove("id");
        without_envelope.remove("metadata");
        assert_eq!(without_envelope, Document::from_serializable(&draft).unwrap());
    }

    #[tokio::test]
    async fn test_e2e_kitchen_remodel_timeline() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let mutations = core.project_mutations();

        let project = mutations
            .create_project(ProjectDraft::named("Kitchen Remodel"))
            .await
            .unwrap();
        assert_eq!(project.metadata.version, 1);
        assert_eq!(project.status, ProjectStatus::Planning);

        let before = core.queue().all().await.unwrap().len();
        let updated = mutations
            .update_project_status(&project.id, ProjectStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.metadata.version, 2);

        let queue = core.queue().all().await.unwrap();
        assert_eq!(queue.len(), before + 1);
        let last = queue.last().unwrap();
        assert_eq!(last.operation, MutationOperation::Update);
        assert_eq!(last.store_name, "projects");
        assert_eq!(last.entity_id, project.id);

        let events = core.activity().events_for_project(&project.id).await.unwrap();
        let change = events
            .iter()
            .find(|e| e.event_type == "project.status_changed")
            .unwrap();
        assert_eq!(change.payload.get("old_status"), Some(&json!("planning")));
        assert_eq!(change.payload.get("new_status"), Some(&json!("in_progress")));

        mutations.delete_project(&project.id).await.unwrap();
        let gone = core.repository::<Project>().get(&project.id).await;
        assert!(matches!(gone, Err(AppError::NotFound { .. })));
        assert_eq!(
            core.queue().all().await.unwrap().last().map(|i| i.operation),
            Some(MutationOperation::Delete)
        );
    }

    #[tokio::test]
    async fn test_e2e_homeowner_view_hides_costs() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let mutations = core.project_mutations();

        let project = mutations.create_project(ProjectDraft::named("Roof")).await.unwrap();
        mutations
            .add_line_item(LineItemDraft {
                project_id: project.id.clone(),
                description: "Shingles".to_string(),
                quantity: 30,
                unit_cost_cents: 4_200,
            })
            .await
            .unwrap();
        mutations
            .add_photo(PhotoDraft {
                project_id: project.id.clone(),
                uri: "file:///photos/roof.jpg".to_string(),
                caption: None,
                taken_at: None,
            })
            .await
            .unwrap();
        core.activity()
            .log_event("note.internal_added", &project.id, &project.id, json!({"text": "margin is thin"}))
            .await
            .unwrap();

        let all = core.activity().events_for_project(&project.id).await.unwrap();
        assert_eq!(all.len(), 4);
        let visible = core.activity().visible_to_homeowner(&project.id).await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|e| !is_internal_event(&e.event_type)));
    }

    #[tokio::test]
    async fn test_e2e_crew_switch_leaves_one_active_record() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let registry = core.session_registry();

        registry.switch_to("crew_1", "Nathan", "P1").await.unwrap();
        registry.switch_to("crew_2", "Nishant", "P1").await.unwrap();

        let active = registry.get_active().await.unwrap().unwrap();
        assert_eq!(active.member_id, "crew_2");

        let raw_active = core
            .store()
            .query("activeSessions", &|d: &Document| {
                d.get("isActive") == Some(&json!(true))
            })
            .await
            .unwrap();
        assert_eq!(raw_active.len(), 1);
        assert_eq!(raw_active[0].id(), Some(active.id.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_concurrent_updates_are_serialized() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let projects = core.repository::<Project>();
        let project = projects.create(ProjectDraft::named("Garage")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let projects = projects.clone();
            let id = project.id.clone();
            handles.push(tokio::spawn(async move {
                projects.update(&id, json!({"address": format!("Lot {i}")})).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = projects.get(&project.id).await.unwrap();
        assert_eq!(stored.metadata.version, 7);
        assert_eq!(core.queue().pending_for("projects").await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_e2e_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (project_id, queued) = {
            let core = open_core(&dir).await;
            let project = core
                .project_mutations()
                .create_project(ProjectDraft::named("Porch"))
                .await
                .unwrap();
            core.session_registry()
                .switch_to("crew_1", "Nathan", &project.id)
                .await
                .unwrap();
            (project.id, core.queue().all().await.unwrap())
        };

        let core = open_core(&dir).await;
        assert_eq!(core.queue().all().await.unwrap(), queued);
        assert_eq!(core.repository::<Project>().get(&project_id).await.unwrap().name, "Porch");
        assert_eq!(
            core.session_registry().get_active().await.unwrap().map(|s| s.member_id),
            Some("crew_1".to_string())
        );

        let next = core
            .queue()
            .enqueue_delete("projects", &project_id)
            .await
            .unwrap();
        let max_before = queued.iter().map(|i| i.sequence).max().unwrap();
        assert!(next.sequence > max_before);

        let events = core.activity().events_for_project(&project_id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_e2e_drain_marks_everything_synced() {
        let dir = TempDir::new().unwrap();
        let core = open_core(&dir).await;
        let mutations = core.project_mutations();
        let project = mutations.create_project(ProjectDraft::named("Fence")).await.unwrap();
        mutations.rename_project(&project.id, "Cedar Fence").await.unwrap();

        let report = core.drainer(AckEverything).drain_once().await.unwrap();
        assert_eq!(report.acked, 2);
        assert_eq!(report.failed, 0);

        let stats = core.queue().stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.synced, 2);
        assert_eq!(core.queue().clear_synced().await.unwrap(), 2);
        assert!(core.queue().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_e2e_unopenable_store_fails_at_startup() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"plain file").unwrap();
        let config = CoreConfig::with_db_path(blocker.join("db").to_string_lossy().to_string());

        let result = OfflineCore::open(config).await;
        assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_e2e_memory_backed_core() {
        let core = OfflineCore::with_store(
            CoreConfig::default(),
            Arc::new(crate::MemoryStore::new()),
        )
        .await
        .unwrap();
        let project = core
            .project_mutations()
            .create_project(ProjectDraft::named("Sunroom"))
            .await
            .unwrap();
        assert_eq!(core.repository::<Project>().count().await.unwrap(), 1);
        assert_eq!(core.queue().pending().await.unwrap()[0].entity_id, project.id);
    }
}
