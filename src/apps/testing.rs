//! In-memory adapters for exercising app flows without Postgres.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult, NotFoundKind};
use crate::pagination::{Page, PagedResponse};
use crate::stripe::models::StripeAppData;

use super::factory::AppFactory;
use super::installed::InstalledApp;
use super::models::{AppBase, AppId, AppRecord, AppStatus, CreateAppInput, CustomerData, CustomerId};
use super::store::AppStore;

#[derive(Default)]
struct State {
    apps: Vec<AppRecord>,
    stripe: HashMap<Uuid, StripeAppData>,
    customers: HashMap<(Uuid, String), CustomerData>,
}

impl State {
    fn find(&self, id: &AppId) -> Option<&AppRecord> {
        self.apps
            .iter()
            .find(|app| &app.id == id && app.deleted_at.is_none())
    }
}

#[derive(Default)]
pub struct InMemoryAppStore {
    state: Mutex<State>,
}

impl InMemoryAppStore {
    pub async fn app_count(&self) -> usize {
        self.state.lock().await.apps.len()
    }

    pub async fn customer_row_count(&self) -> usize {
        self.state.lock().await.customers.len()
    }
}

#[async_trait]
impl AppStore for InMemoryAppStore {
    async fn create_app(&self, input: CreateAppInput) -> AppResult<AppRecord> {
        input.validate()?;
        let mut state = self.state.lock().await;
        if state.apps.iter().any(|app| app.id.id == input.id.id) {
            return Err(AppError::validation(format!("app {} already exists", input.id)));
        }
        let now = Utc::now();
        let record = AppRecord {
            id: input.id,
            app_type: input.app_type,
            status: AppStatus::Ready,
            name: input.name,
            description: input.description,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.apps.push(record.clone());
        Ok(record)
    }

    async fn create_stripe_app(
        &self,
        input: CreateAppInput,
        data: StripeAppData,
    ) -> AppResult<AppRecord> {
        let id = input.id.id;
        let record = self.create_app(input).await?;
        self.state.lock().await.stripe.insert(id, data);
        Ok(record)
    }

    async fn get_app(&self, id: &AppId) -> AppResult<AppRecord> {
        self.state
            .lock()
            .await
            .find(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(NotFoundKind::App, id))
    }

    async fn list_apps(&self, namespace: &str, page: Page) -> AppResult<PagedResponse<AppRecord>> {
        page.validate()?;
        let state = self.state.lock().await;
        let apps: Vec<AppRecord> = state
            .apps
            .iter()
            .filter(|app| app.id.namespace == namespace && app.deleted_at.is_none())
            .cloned()
            .collect();
        Ok(PagedResponse::from_slice(page, &apps))
    }

    async fn update_app_status(
        &self,
        id: &AppId,
        expected: AppStatus,
        status: AppStatus,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(app) = state
            .apps
            .iter_mut()
            .find(|app| &app.id == id && app.deleted_at.is_none())
        else {
            return Ok(false);
        };
        if app.status != expected {
            return Ok(false);
        }
        app.status = status;
        app.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_app(&self, id: &AppId) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.apps.len();
        state.apps.retain(|app| &app.id != id);
        let removed = (before - state.apps.len()) as u64;
        if removed > 0 {
            state.stripe.remove(&id.id);
            state.customers.retain(|(app_id, _), _| *app_id != id.id);
        }
        Ok(removed)
    }

    async fn get_stripe_app_data(&self, id: &AppId) -> AppResult<StripeAppData> {
        let state = self.state.lock().await;
        state
            .find(id)
            .and_then(|_| state.stripe.get(&id.id))
            .cloned()
            .ok_or_else(|| AppError::not_found(NotFoundKind::App, id))
    }

    async fn get_stripe_app_by_id(&self, id: Uuid) -> AppResult<StripeAppData> {
        self.state
            .lock()
            .await
            .stripe
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(NotFoundKind::WebhookApp, id))
    }

    async fn get_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<Option<CustomerData>> {
        let state = self.state.lock().await;
        if state.find(app_id).is_none() {
            return Ok(None);
        }
        Ok(state
            .customers
            .get(&(app_id.id, customer_id.id.clone()))
            .cloned())
    }

    async fn upsert_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
        data: &CustomerData,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.find(app_id).is_none() {
            return Err(AppError::not_found(NotFoundKind::App, app_id));
        }
        state
            .customers
            .insert((app_id.id, customer_id.id.clone()), data.clone());
        Ok(())
    }

    async fn delete_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<()> {
        self.state
            .lock()
            .await
            .customers
            .remove(&(app_id.id, customer_id.id.clone()));
        Ok(())
    }
}

/// Factory that installs nothing; useful for registry wiring tests.
pub struct NoopFactory;

#[async_trait]
impl AppFactory for NoopFactory {
    async fn new_app(&self, base: AppBase) -> AppResult<InstalledApp> {
        Err(AppError::validation(format!(
            "no app implementation for {}",
            base.app_type
        )))
    }

    async fn uninstall(&self, _app: &AppBase) -> AppResult<()> {
        Ok(())
    }
}
