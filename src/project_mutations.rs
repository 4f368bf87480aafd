//! Typed mutations for the project domain.
//!
//! Each call commits through the repository first and then emits its activity
//! event through [`ActivityLog::record`]. The event is best effort: the mutation's
//! result is returned whether or not the audit write made it.
//!
//! The project's write lock is held until the event is stamped, so a project's
//! timeline follows the order its mutations were applied in.

use std::sync::Arc;

use serde_json::json;

use crate::activity_log::{event_types, ActivityLog};
use crate::app_error::AppResult;
use crate::entities::{LineItem, LineItemDraft, Photo, PhotoDraft, Project, ProjectDraft, ProjectStatus};
use crate::entity_repository::EntityRepository;

pub struct ProjectMutations {
    projects: EntityRepository<Project>,
    line_items: EntityRepository<LineItem>,
    photos: EntityRepository<Photo>,
    activity: Arc<ActivityLog>,
}

impl ProjectMutations {
    pub fn new(
        projects: EntityRepository<Project>,
        line_items: EntityRepository<LineItem>,
        photos: EntityRepository<Photo>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            projects,
            line_items,
            photos,
            activity,
        }
    }

    pub async fn create_project(&self, draft: ProjectDraft) -> AppResult<Project> {
        let (project, _lock) = self.projects.create_locked(draft).await?;
        self.activity
            .record(
                event_types::PROJECT_CREATED,
                &project.id,
                &project.id,
                json!({"name": project.name, "status": project.status.as_str()}),
            )
            .await;
        Ok(project)
    }

    /// Moves the project to `new_status`. Setting the current status again is a no-op.
    pub async fn update_project_status(
        &self,
        project_id: &str,
        new_status: ProjectStatus,
    ) -> AppResult<Project> {
        let lock = self.projects.lock(project_id).await;
        let current = self.projects.get(project_id).await?;
        if current.status == new_status {
            return Ok(current);
        }
        let updated = self
            .projects
            .update_locked(
                &lock,
                json!({"status": new_status}),
                Some(current.metadata.version),
            )
            .await?;
        self.activity
            .record(
                event_types::PROJECT_STATUS_CHANGED,
                project_id,
                project_id,
                json!({
                    "old_status": current.status.as_str(),
                    "new_status": new_status.as_str(),
                }),
            )
            .await;
        Ok(updated)
    }

    pub async fn rename_project(&self, project_id: &str, name: &str) -> AppResult<Project> {
        let lock = self.projects.lock(project_id).await;
        let current = self.projects.get(project_id).await?;
        let updated = self
            .projects
            .update_locked(&lock, json!({"name": name}), Some(current.metadata.version))
            .await?;
        self.activity
            .record(
                event_types::PROJECT_RENAMED,
                project_id,
                project_id,
                json!({"old_name": current.name, "new_name": name}),
            )
            .await;
        Ok(updated)
    }

    pub async fn delete_project(&self, project_id: &str) -> AppResult<()> {
        let lock = self.projects.lock(project_id).await;
        let current = self.projects.get(project_id).await?;
        self.projects.delete_locked(&lock).await?;
        self.activity
            .record(
                event_types::PROJECT_DELETED,
                project_id,
                project_id,
                json!({"name": current.name}),
            )
            .await;
        Ok(())
    }

    /// Adds a priced line to an existing project. The event is internal-only.
    pub async fn add_line_item(&self, draft: LineItemDraft) -> AppResult<LineItem> {
        let _project = self.projects.lock(&draft.project_id).await;
        self.projects.get(&draft.project_id).await?;
        let item = self.line_items.create(draft).await?;
        self.activity
            .record(
                event_types::LINE_ITEM_ADDED,
                &item.project_id,
                &item.id,
                json!({
                    "description": item.description,
                    "quantity": item.quantity,
                    "unit_cost_cents": item.unit_cost_cents,
                    "total_cents": item.total_cents(),
                }),
            )
            .await;
        Ok(item)
    }

    pub async fn add_photo(&self, draft: PhotoDraft) -> AppResult<Photo> {
        let _project = self.projects.lock(&draft.project_id).await;
        self.projects.get(&draft.project_id).await?;
        let photo = self.photos.create(draft).await?;
        self.activity
            .record(
                event_types::PHOTO_ADDED,
                &photo.project_id,
                &photo.id,
                json!({"uri": photo.uri, "caption": photo.caption}),
            )
            .await;
        Ok(photo)
    }

    pub fn projects(&self) -> &EntityRepository<Project> {
        &self.projects
    }
}
