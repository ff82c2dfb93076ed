use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult, NotFoundKind};
use crate::marketplace::AppType;
use crate::pagination::{Page, PagedResponse};
use crate::secrets::{SecretRef, STRIPE_API_KEY_SECRET, STRIPE_WEBHOOK_SECRET};
use crate::stripe::models::StripeAppData;

use super::models::{AppId, AppRecord, AppStatus, CreateAppInput, CustomerData, CustomerId};

/// key: apps-store -> local persistence port
///
/// Every write is one short transaction. Provider calls never run inside it.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn create_app(&self, input: CreateAppInput) -> AppResult<AppRecord>;
    /// Writes the app row and its Stripe row together.
    async fn create_stripe_app(
        &self,
        input: CreateAppInput,
        data: StripeAppData,
    ) -> AppResult<AppRecord>;
    async fn get_app(&self, id: &AppId) -> AppResult<AppRecord>;
    async fn list_apps(&self, namespace: &str, page: Page) -> AppResult<PagedResponse<AppRecord>>;
    /// Compare-and-set on the status column. Returns whether the row changed.
    async fn update_app_status(
        &self,
        id: &AppId,
        expected: AppStatus,
        status: AppStatus,
    ) -> AppResult<bool>;
    /// Hard delete; dependent rows go with it. Returns the affected row count.
    async fn delete_app(&self, id: &AppId) -> AppResult<u64>;

    async fn get_stripe_app_data(&self, id: &AppId) -> AppResult<StripeAppData>;
    /// Lookup by bare id for inbound webhooks, where the namespace is not yet known.
    async fn get_stripe_app_by_id(&self, id: Uuid) -> AppResult<StripeAppData>;

    async fn get_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<Option<CustomerData>>;
    async fn upsert_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
        data: &CustomerData,
    ) -> AppResult<()>;
    async fn delete_customer_data(&self, app_id: &AppId, customer_id: &CustomerId)
        -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgAppStore {
    pool: PgPool,
}

impl PgAppStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_app(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateAppInput,
    ) -> AppResult<AppRecord> {
        let row = sqlx::query_as::<_, AppRow>(
            "INSERT INTO apps (id, namespace, app_type, status, name, description, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, namespace, app_type, status, name, description, metadata, created_at, updated_at, deleted_at",
        )
        .bind(input.id.id)
        .bind(&input.id.namespace)
        .bind(input.app_type.as_str())
        .bind(AppStatus::Ready.as_str())
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.metadata)
        .fetch_one(&mut *tx)
        .await?;
        row.try_into()
    }
}

#[derive(Debug, FromRow)]
struct AppRow {
    id: Uuid,
    namespace: String,
    app_type: String,
    status: String,
    name: String,
    description: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<AppRow> for AppRecord {
    type Error = AppError;

    fn try_from(row: AppRow) -> AppResult<Self> {
        let app_type: AppType = row.app_type.parse().map_err(|_| {
            AppError::Inconsistency(format!("unknown app type stored: {}", row.app_type))
        })?;
        Ok(AppRecord {
            id: AppId::new(row.namespace, row.id),
            app_type,
            status: row.status.parse()?,
            name: row.name,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StripeRow {
    app_id: Uuid,
    namespace: String,
    account_id: String,
    livemode: bool,
    masked_api_key: String,
    api_key_secret_id: Uuid,
    webhook_secret_id: Uuid,
    webhook_endpoint_id: String,
}

impl From<StripeRow> for StripeAppData {
    fn from(row: StripeRow) -> Self {
        let app_id = AppId::new(row.namespace, row.app_id);
        StripeAppData {
            account_id: row.account_id,
            livemode: row.livemode,
            masked_api_key: row.masked_api_key,
            api_key: SecretRef {
                app_id: app_id.clone(),
                key: STRIPE_API_KEY_SECRET.to_string(),
                id: row.api_key_secret_id,
            },
            webhook_secret: SecretRef {
                app_id,
                key: STRIPE_WEBHOOK_SECRET.to_string(),
                id: row.webhook_secret_id,
            },
            webhook_endpoint_id: row.webhook_endpoint_id,
        }
    }
}

const APP_COLUMNS: &str =
    "id, namespace, app_type, status, name, description, metadata, created_at, updated_at, deleted_at";

const STRIPE_COLUMNS: &str = "app_id, namespace, account_id, livemode, masked_api_key, \
     api_key_secret_id, webhook_secret_id, webhook_endpoint_id";

#[async_trait]
impl AppStore for PgAppStore {
    async fn create_app(&self, input: CreateAppInput) -> AppResult<AppRecord> {
        input.validate()?;
        let mut tx = self.pool.begin().await?;
        let record = Self::insert_app(&mut tx, &input).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn create_stripe_app(
        &self,
        input: CreateAppInput,
        data: StripeAppData,
    ) -> AppResult<AppRecord> {
        input.validate()?;
        let mut tx = self.pool.begin().await?;
        let record = Self::insert_app(&mut tx, &input).await?;
        sqlx::query(
            "INSERT INTO app_stripe (app_id, namespace, account_id, livemode, masked_api_key, \
             api_key_secret_id, webhook_secret_id, webhook_endpoint_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(input.id.id)
        .bind(&input.id.namespace)
        .bind(&data.account_id)
        .bind(data.livemode)
        .bind(&data.masked_api_key)
        .bind(data.api_key.id)
        .bind(data.webhook_secret.id)
        .bind(&data.webhook_endpoint_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn get_app(&self, id: &AppId) -> AppResult<AppRecord> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE namespace = $1 AND id = $2 AND deleted_at IS NULL"
        ))
        .bind(&id.namespace)
        .bind(id.id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| AppError::not_found(NotFoundKind::App, id))?
            .try_into()
    }

    async fn list_apps(&self, namespace: &str, page: Page) -> AppResult<PagedResponse<AppRecord>> {
        page.validate()?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM apps WHERE namespace = $1 AND deleted_at IS NULL",
        )
        .bind(namespace)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE namespace = $1 AND deleted_at IS NULL \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(namespace)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(AppRecord::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(PagedResponse {
            page,
            total_count: total as usize,
            items,
        })
    }

    async fn update_app_status(
        &self,
        id: &AppId,
        expected: AppStatus,
        status: AppStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE apps SET status = $3, updated_at = NOW() \
             WHERE namespace = $1 AND id = $2 AND status = $4 AND deleted_at IS NULL",
        )
        .bind(&id.namespace)
        .bind(id.id)
        .bind(status.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_app(&self, id: &AppId) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM apps WHERE namespace = $1 AND id = $2")
            .bind(&id.namespace)
            .bind(id.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn get_stripe_app_data(&self, id: &AppId) -> AppResult<StripeAppData> {
        let row = sqlx::query_as::<_, StripeRow>(&format!(
            "SELECT {STRIPE_COLUMNS} FROM app_stripe WHERE namespace = $1 AND app_id = $2"
        ))
        .bind(&id.namespace)
        .bind(id.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StripeAppData::from)
            .ok_or_else(|| AppError::not_found(NotFoundKind::App, id))
    }

    async fn get_stripe_app_by_id(&self, id: Uuid) -> AppResult<StripeAppData> {
        let row = sqlx::query_as::<_, StripeRow>(&format!(
            "SELECT {STRIPE_COLUMNS} FROM app_stripe WHERE app_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StripeAppData::from)
            .ok_or_else(|| AppError::not_found(NotFoundKind::WebhookApp, id))
    }

    async fn get_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<Option<CustomerData>> {
        let data: Option<Value> = sqlx::query_scalar(
            "SELECT data FROM app_customers WHERE namespace = $1 AND app_id = $2 AND customer_id = $3",
        )
        .bind(&app_id.namespace)
        .bind(app_id.id)
        .bind(&customer_id.id)
        .fetch_optional(&self.pool)
        .await?;

        data.map(|value| {
            serde_json::from_value(value).map_err(|err| {
                AppError::Inconsistency(format!(
                    "malformed customer data for {customer_id} on app {app_id}: {err}"
                ))
            })
        })
        .transpose()
    }

    async fn upsert_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
        data: &CustomerData,
    ) -> AppResult<()> {
        let payload = serde_json::to_value(data)
            .map_err(|err| AppError::validation(format!("invalid customer data: {err}")))?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO app_customers (namespace, app_id, customer_id, data) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (namespace, app_id, customer_id) \
             DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()",
        )
        .bind(&app_id.namespace)
        .bind(app_id.id)
        .bind(&customer_id.id)
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM app_customers WHERE namespace = $1 AND app_id = $2 AND customer_id = $3",
        )
        .bind(&app_id.namespace)
        .bind(app_id.id)
        .bind(&customer_id.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
