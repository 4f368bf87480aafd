//! "Who is entering data right now" on a shared device.
//!
//! At most one [`CrewSession`] may be active. Switching is deactivate-all followed
//! by create, and the two steps are not atomic at the storage level, so the whole
//! sequence runs under one registry-wide lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::activity_log::{event_types, ActivityLog};
use crate::app_error::AppResult;
use crate::entity_repository::EntityRepository;
use crate::local_db_model::{Entity, Metadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewSession {
    pub id: String,
    pub member_id: String,
    pub member_name: String,
    /// Project (or other scope) the member is working in.
    pub scope_id: String,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewSessionDraft {
    pub member_id: String,
    pub member_name: String,
    pub scope_id: String,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Entity for CrewSession {
    const COLLECTION: &'static str = "activeSessions";
    const ID_PREFIX: &'static str = "sess";
    type Draft = CrewSessionDraft;

    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

pub struct SessionRegistry {
    sessions: EntityRepository<CrewSession>,
    activity: Arc<ActivityLog>,
    switch_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(sessions: EntityRepository<CrewSession>, activity: Arc<ActivityLog>) -> Self {
        Self {
            sessions,
            activity,
            switch_lock: Mutex::new(()),
        }
    }

    /// Ends whatever session is active and starts one for `member_id`.
    ///
    /// The lock is held until the activity events are stamped, so the timeline
    /// never shows a session ending before it started.
    pub async fn switch_to(
        &self,
        member_id: &str,
        member_name: &str,
        scope_id: &str,
    ) -> AppResult<CrewSession> {
        let _guard = self.switch_lock.lock().await;
        self.deactivate_all().await?;
        let session = self.start(member_id, member_name, scope_id).await?;
        self.activity
            .record(
                event_types::SESSION_STARTED,
                &session.scope_id,
                &session.id,
                json!({"member_id": session.member_id, "member_name": session.member_name}),
            )
            .await;
        info!("Active session is now {} ({})", session.member_name, session.id);
        Ok(session)
    }

    /// Ends every active session; returns the sessions that were ended.
    pub async fn end_session(&self) -> AppResult<Vec<CrewSession>> {
        let _guard = self.switch_lock.lock().await;
        self.deactivate_all().await
    }

    pub async fn get_active(&self) -> AppResult<Option<CrewSession>> {
        Ok(self
            .sessions
            .query(|s| s.is_active)
            .await?
            .into_iter()
            .next())
    }

    pub async fn active_count(&self) -> AppResult<usize> {
        Ok(self.sessions.query(|s| s.is_active).await?.len())
    }

    /// All sessions ever started, oldest first.
    pub async fn history(&self) -> AppResult<Vec<CrewSession>> {
        let mut sessions = self.sessions.list().await?;
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    /// Each session is audited as soon as it is closed, even if a later one fails.
    async fn deactivate_all(&self) -> AppResult<Vec<CrewSession>> {
        let active = self.sessions.query(|s| s.is_active).await?;
        let mut ended = Vec::with_capacity(active.len());
        for session in active {
            let closed = self
                .sessions
                .update(
                    &session.id,
                    json!({"isActive": false, "endedAt": Utc::now()}),
                )
                .await?;
            self.audit_end(&closed).await;
            ended.push(closed);
        }
        Ok(ended)
    }

    async fn start(
        &self,
        member_id: &str,
        member_name: &str,
        scope_id: &str,
    ) -> AppResult<CrewSession> {
        self.sessions
            .create(CrewSessionDraft {
                member_id: member_id.to_string(),
                member_name: member_name.to_string(),
                scope_id: scope_id.to_string(),
                is_active: true,
                started_at: Utc::now(),
                ended_at: None,
            })
            .await
    }

    async fn audit_end(&self, session: &CrewSession) {
        self.activity
            .record(
                event_types::SESSION_ENDED,
                &session.scope_id,
                &session.id,
                json!({"member_id": session.member_id}),
            )
            .await;
    }
}
