//! Entity families persisted by the construction-project app.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::local_db_model::{Entity, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub customer_id: Option<String>,
    pub address: Option<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    pub status: ProjectStatus,
    pub customer_id: Option<String>,
    pub address: Option<String>,
}

impl ProjectDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProjectStatus::Planning,
            customer_id: None,
            address: None,
        }
    }
}

impl Entity for Project {
    const COLLECTION: &'static str = "projects";
    const ID_PREFIX: &'static str = "proj";
    type Draft = ProjectDraft;

    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDraft {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Entity for Customer {
    const COLLECTION: &'static str = "customers";
    const ID_PREFIX: &'static str = "cust";
    type Draft = CustomerDraft;

    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// One priced row of an estimate. Amounts are integer cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub quantity: u32,
    pub unit_cost_cents: i64,
    pub metadata: Metadata,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        i64::from(self.quantity) * self.unit_cost_cents
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemDraft {
    pub project_id: String,
    pub description: String,
    pub quantity: u32,
    pub unit_cost_cents: i64,
}

impl Entity for LineItem {
    const COLLECTION: &'static str = "lineItems";
    const ID_PREFIX: &'static str = "item";
    type Draft = LineItemDraft;

    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub project_id: String,
    pub uri: String,
    pub caption: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDraft {
    pub project_id: String,
    pub uri: String,
    pub caption: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl Entity for Photo {
    const COLLECTION: &'static str = "photos";
    const ID_PREFIX: &'static str = "photo";
    type Draft = PhotoDraft;

    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
