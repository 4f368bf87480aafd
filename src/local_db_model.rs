//! Data model definitions for database storage.
//!
//! This module defines the structures every collection is made of. The physical
//! unit is [`Document`], a schema-free JSON object keyed by its `id`. Typed
//! entities implement [`Entity`] and carry the common [`Metadata`] envelope that
//! the repository layer maintains.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::app_error::{AppError, AppResult};

/// Key under which a document stores its identifier.
pub const ID_FIELD: &str = "id";
/// Key under which an entity stores its [`Metadata`] envelope.
pub const METADATA_FIELD: &str = "metadata";

/// An opaque, schema-free record stored in a collection.
///
/// A document is a JSON object. The only field the storage layer interprets is
/// `id`, which [`crate::local_db_state::DocumentStore::set`] always rewrites to
/// match the key it is stored under.
///
/// # Examples
///
/// ```rust
/// use jobsite_offline_core::local_db_model::Document;
/// use serde_json::json;
///
/// let doc = Document::from_value(json!({"id": "proj_1", "name": "Kitchen Remodel"}))?;
/// assert_eq!(doc.id(), Some("proj_1"));
/// assert_eq!(doc.get("name"), Some(&json!("Kitchen Remodel")));
/// # Ok::<(), jobsite_offline_core::AppError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, JsonValue>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Accepts only JSON objects.
    pub fn from_value(value: JsonValue) -> AppResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(AppError::Validation(format!(
                "document must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Serializes any value into a document. Fails if it is not an object.
    pub fn from_serializable<T: Serialize>(value: &T) -> AppResult<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(JsonValue::as_str)
    }

    /// Forces the stored id to `id`, replacing whatever the body carried.
    pub fn set_id(&mut self, id: &str) {
        self.0.insert(ID_FIELD.to_string(), JsonValue::String(id.to_string()));
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<JsonValue> {
        self.0.remove(field)
    }

    /// Shallow merge: each top-level key of `patch` replaces the existing value.
    pub fn merge(&mut self, patch: Map<String, JsonValue>) {
        for (key, value) in patch {
            self.0.insert(key, value);
        }
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    pub fn to_entity<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(serde_json::from_value(JsonValue::Object(self.0.clone()))?)
    }

    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Map<String, JsonValue>> for Document {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Lifecycle envelope carried by every entity.
///
/// - `created_at` never changes after creation.
/// - `updated_at >= created_at`, and strictly increases on each accepted update.
/// - `version` starts at 1 and grows by exactly 1 per accepted update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Metadata {
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Next envelope after an accepted update.
    ///
    /// Two updates inside the same clock tick still get distinct, increasing
    /// `updated_at` values.
    pub fn bumped(&self) -> Self {
        let now = Utc::now();
        let updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
        Self {
            created_at: self.created_at,
            updated_at,
            version: self.version + 1,
        }
    }
}

/// A typed document family living in its own collection.
///
/// Implementors serialize to a JSON object holding `id`, `metadata` and the
/// fields of [`Entity::Draft`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name, e.g. `"projects"`.
    const COLLECTION: &'static str;
    /// Prefix used for generated ids, e.g. `"proj"`.
    const ID_PREFIX: &'static str;

    /// The caller-supplied fields of a new entity (everything except `id` and `metadata`).
    type Draft: Serialize + Send + Sync;

    fn id(&self) -> &str;
    fn metadata(&self) -> &Metadata;
}
