//! Append-only record of domain-significant events.
//!
//! The log keeps "what happened" facts (a status change, a payment) rather than
//! raw CRUD. Writing to it is advisory with respect to the mutation that produced
//! the event: callers go through [`ActivityLog::record`], which never fails, so a
//! lost audit write cannot roll back or block the primary mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::app_error::{AppError, AppResult};
use crate::ids::generate_id;
use crate::local_db_model::Document;
use crate::local_db_state::DocumentStore;

pub const ACTIVITY_LOG_COLLECTION: &str = "activityLog";
const EVENT_ID_PREFIX: &str = "evt";

/// Dot-namespaced event types emitted by the mutation wrappers.
pub mod event_types {
    pub const PROJECT_CREATED: &str = "project.created";
    pub const PROJECT_RENAMED: &str = "project.renamed";
    pub const PROJECT_STATUS_CHANGED: &str = "project.status_changed";
    pub const PROJECT_DELETED: &str = "project.deleted";
    pub const PHOTO_ADDED: &str = "photo.added";
    pub const INSPECTION_SCHEDULED: &str = "inspection.scheduled";
    pub const SESSION_STARTED: &str = "session.started";
    pub const SESSION_ENDED: &str = "session.ended";

    pub const LINE_ITEM_ADDED: &str = "line_item.added";
    pub const LINE_ITEM_COST_CHANGED: &str = "line_item.cost_changed";
    pub const ESTIMATE_MARGIN_ADJUSTED: &str = "estimate.margin_adjusted";
    pub const CHANGE_ORDER_COST_UPDATED: &str = "change_order.cost_updated";
    pub const INVOICE_PAYMENT_RECORDED: &str = "invoice.payment_recorded";
    pub const NOTE_INTERNAL_ADDED: &str = "note.internal_added";
}

/// Event types that must never reach the homeowner-facing timeline:
/// financial facts and internal-only annotations.
pub const INTERNAL_EVENT_TYPES: &[&str] = &[
    event_types::LINE_ITEM_ADDED,
    event_types::LINE_ITEM_COST_CHANGED,
    event_types::ESTIMATE_MARGIN_ADJUSTED,
    event_types::CHANGE_ORDER_COST_UPDATED,
    event_types::INVOICE_PAYMENT_RECORDED,
    event_types::NOTE_INTERNAL_ADDED,
];

pub fn is_internal_event(event_type: &str) -> bool {
    INTERNAL_EVENT_TYPES.contains(&event_type)
}

/// The one place deciding what a homeowner may see.
pub fn filter_homeowner_visible(events: Vec<ActivityEvent>) -> Vec<ActivityEvent> {
    events
        .into_iter()
        .filter(|event| !is_internal_event(&event.event_type))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub event_type: String,
    pub project_id: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    /// Breaks timestamp ties in insertion order.
    pub sequence: u64,
    #[serde(default)]
    pub payload: Map<String, JsonValue>,
}

/// Result of a best-effort audit write.
#[derive(Debug)]
pub enum AuditOutcome {
    Recorded(ActivityEvent),
    Dropped(AppError),
}

impl AuditOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, AuditOutcome::Recorded(_))
    }

    pub fn event(&self) -> Option<&ActivityEvent> {
        match self {
            AuditOutcome::Recorded(event) => Some(event),
            AuditOutcome::Dropped(_) => None,
        }
    }
}

struct Clock {
    last_timestamp: DateTime<Utc>,
    next_sequence: u64,
}

pub struct ActivityLog {
    store: Arc<dyn DocumentStore>,
    clock: Mutex<Clock>,
}

impl ActivityLog {
    /// Opens the log over `store`, resuming ordering after any persisted events.
    pub async fn open(store: Arc<dyn DocumentStore>) -> AppResult<Self> {
        let existing = store.get_all(ACTIVITY_LOG_COLLECTION).await?;
        let mut clock = Clock {
            last_timestamp: DateTime::<Utc>::MIN_UTC,
            next_sequence: 1,
        };
        for doc in &existing {
            let event: ActivityEvent = doc.to_entity()?;
            clock.last_timestamp = clock.last_timestamp.max(event.timestamp);
            clock.next_sequence = clock.next_sequence.max(event.sequence + 1);
        }
        info!("Activity log opened with {} events", existing.len());
        Ok(Self {
            store,
            clock: Mutex::new(clock),
        })
    }

    /// Appends one event. `payload` must be a JSON object or `null`.
    pub async fn log_event(
        &self,
        event_type: &str,
        project_id: &str,
        entity_id: &str,
        payload: JsonValue,
    ) -> AppResult<ActivityEvent> {
        let payload = match payload {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            _ => {
                return Err(AppError::Validation(
                    "activity payload must be a JSON object".to_string(),
                ))
            }
        };
        if event_type.trim().is_empty() {
            return Err(AppError::Validation("event type must not be empty".to_string()));
        }

        let (timestamp, sequence) = {
            let mut clock = self.clock.lock();
            // Never hand out a timestamp older than one already logged.
            let now = Utc::now().max(clock.last_timestamp);
            clock.last_timestamp = now;
            let sequence = clock.next_sequence;
            clock.next_sequence += 1;
            (now, sequence)
        };

        let event = ActivityEvent {
            id: generate_id(EVENT_ID_PREFIX),
            event_type: event_type.to_string(),
            project_id: project_id.to_string(),
            entity_id: entity_id.to_string(),
            timestamp,
            sequence,
            payload,
        };
        let doc = Document::from_serializable(&event)?;
        self.store.set(ACTIVITY_LOG_COLLECTION, &event.id, doc).await?;
        debug!("Logged {} for project {}", event.event_type, event.project_id);
        Ok(event)
    }

    /// Best-effort variant of [`ActivityLog::log_event`]: failures are reported on
    /// the diagnostic log and returned as [`AuditOutcome::Dropped`], never as `Err`.
    pub async fn record(
        &self,
        event_type: &str,
        project_id: &str,
        entity_id: &str,
        payload: JsonValue,
    ) -> AuditOutcome {
        match self.log_event(event_type, project_id, entity_id, payload).await {
            Ok(event) => AuditOutcome::Recorded(event),
            Err(e) => {
                warn!(
                    "Dropped activity event {} for {}/{}: {}",
                    event_type, project_id, entity_id, e
                );
                AuditOutcome::Dropped(e)
            }
        }
    }

    async fn all(&self) -> AppResult<Vec<ActivityEvent>> {
        let docs = self.store.get_all(ACTIVITY_LOG_COLLECTION).await?;
        let mut events = docs
            .iter()
            .map(|doc| doc.to_entity::<ActivityEvent>())
            .collect::<AppResult<Vec<_>>>()?;
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(events)
    }

    /// The project's timeline, oldest first.
    pub async fn events_for_project(&self, project_id: &str) -> AppResult<Vec<ActivityEvent>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|event| event.project_id == project_id)
            .collect())
    }

    pub async fn events_for_entity(&self, entity_id: &str) -> AppResult<Vec<ActivityEvent>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|event| event.entity_id == entity_id)
            .collect())
    }

    pub async fn visible_to_homeowner(&self, project_id: &str) -> AppResult<Vec<ActivityEvent>> {
        Ok(filter_homeowner_visible(
            self.events_for_project(project_id).await?,
        ))
    }

    /// Newest `limit` events across all projects, newest first.
    pub async fn recent(&self, limit: usize) -> AppResult<Vec<ActivityEvent>> {
        let mut events = self.all().await?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }
}
