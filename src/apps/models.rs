use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::marketplace::{AppListing, AppType};
use crate::stripe::models::StripeCustomerData;

/// key: apps-id -> tenant scoped identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId {
    pub namespace: String,
    pub id: Uuid,
}

impl AppId {
    pub fn new(namespace: impl Into<String>, id: Uuid) -> Self {
        Self {
            namespace: namespace.into(),
            id,
        }
    }

    pub fn generate(namespace: impl Into<String>) -> Self {
        Self::new(namespace, Uuid::new_v4())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(AppError::validation("app namespace is required"));
        }
        Ok(())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// key: apps-customer-id -> billing customer reference
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId {
    pub namespace: String,
    pub id: String,
}

impl CustomerId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(AppError::validation("customer namespace is required"));
        }
        if self.id.trim().is_empty() {
            return Err(AppError::validation("customer id is required"));
        }
        Ok(())
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// Cross-entity calls must stay inside one tenant.
pub fn ensure_same_namespace(app_id: &AppId, customer_id: &CustomerId) -> AppResult<()> {
    if app_id.namespace != customer_id.namespace {
        return Err(AppError::validation(format!(
            "app namespace {} does not match customer namespace {}",
            app_id.namespace, customer_id.namespace
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Ready,
    Unauthorized,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Ready => "ready",
            AppStatus::Unauthorized => "unauthorized",
        }
    }
}

impl FromStr for AppStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ready" => Ok(AppStatus::Ready),
            "unauthorized" => Ok(AppStatus::Unauthorized),
            other => Err(AppError::Inconsistency(format!(
                "unknown app status stored: {other}"
            ))),
        }
    }
}

/// key: apps-record -> persisted app row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: AppId,
    #[serde(rename = "type")]
    pub app_type: AppType,
    pub status: AppStatus,
    pub name: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// key: apps-base -> record joined with its marketplace listing
#[derive(Clone, Debug, Serialize)]
pub struct AppBase {
    pub id: AppId,
    #[serde(rename = "type")]
    pub app_type: AppType,
    pub status: AppStatus,
    pub name: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub listing: AppListing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppBase {
    pub fn from_record(record: AppRecord, listing: AppListing) -> Self {
        Self {
            id: record.id,
            app_type: record.app_type,
            status: record.status,
            name: record.name,
            description: record.description,
            metadata: record.metadata,
            listing,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreateAppInput {
    pub id: AppId,
    pub app_type: AppType,
    pub name: String,
    pub description: Option<String>,
    pub metadata: Value,
}

impl CreateAppInput {
    pub fn validate(&self) -> AppResult<()> {
        self.id.validate()?;
        if self.name.trim().is_empty() {
            return Err(AppError::validation("app name is required"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct InstallWithApiKeyInput {
    pub namespace: String,
    pub api_key: String,
    pub name: Option<String>,
    /// Public base URL provider webhooks are delivered to.
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct InstallInput {
    pub namespace: String,
    pub name: Option<String>,
}

/// key: apps-customer-data -> per (app, customer) payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomerData {
    Stripe(StripeCustomerData),
    Sandbox,
}
