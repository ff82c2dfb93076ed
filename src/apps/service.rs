use std::sync::Arc;

use crate::billing::{FinalizeInvoiceResult, Invoice, SyncResult};
use crate::error::{AppError, AppResult, ResultExt};
use crate::marketplace::{AppListing, AppType, CapabilityType, MarketplaceRegistry};
use crate::pagination::{Page, PagedResponse};

use super::installed::InstalledApp;
use super::models::{
    ensure_same_namespace, AppBase, AppId, AppRecord, AppStatus, CustomerData, CustomerId,
    InstallInput, InstallWithApiKeyInput,
};
use super::store::AppStore;

/// key: apps-service -> install orchestration and app reads
#[derive(Clone)]
pub struct AppService {
    registry: Arc<MarketplaceRegistry>,
    store: Arc<dyn AppStore>,
}

impl AppService {
    pub fn new(registry: Arc<MarketplaceRegistry>, store: Arc<dyn AppStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &MarketplaceRegistry {
        &self.registry
    }

    pub fn list_listings(&self, page: Page) -> AppResult<PagedResponse<AppListing>> {
        self.registry.list(page)
    }

    pub fn get_listing(&self, app_type: AppType) -> AppResult<AppListing> {
        self.registry.get_listing(app_type).cloned()
    }

    pub async fn install_with_api_key(
        &self,
        app_type: AppType,
        input: InstallWithApiKeyInput,
    ) -> AppResult<AppBase> {
        let item = self.registry.get(app_type)?;
        let id = item
            .factory
            .install_with_api_key(input)
            .await
            .with_context(|| format!("install {app_type} app"))?;
        tracing::info!(app_id = %id, %app_type, "app installed");
        self.get_app(&id).await
    }

    pub async fn install(&self, app_type: AppType, input: InstallInput) -> AppResult<AppBase> {
        let item = self.registry.get(app_type)?;
        let id = item
            .factory
            .install(input)
            .await
            .with_context(|| format!("install {app_type} app"))?;
        tracing::info!(app_id = %id, %app_type, "app installed");
        self.get_app(&id).await
    }

    /// Removes provider resources first, then the app row. Dependent rows
    /// cascade. Secrets are left in place.
    pub async fn uninstall(&self, id: &AppId) -> AppResult<()> {
        id.validate()?;
        let app = self.get_app(id).await?;
        let item = self.registry.get(app.app_type)?;
        item.factory
            .uninstall(&app)
            .await
            .with_context(|| format!("uninstall app {id}"))?;

        let deleted = self.store.delete_app(id).await?;
        if deleted != 1 {
            return Err(AppError::Inconsistency(format!(
                "uninstall of app {id} deleted {deleted} rows"
            )));
        }
        tracing::info!(app_id = %id, app_type = %app.app_type, "app uninstalled");
        Ok(())
    }

    pub async fn get_app(&self, id: &AppId) -> AppResult<AppBase> {
        id.validate()?;
        let record = self.store.get_app(id).await?;
        self.to_base(record)
    }

    pub async fn list_apps(&self, namespace: &str, page: Page) -> AppResult<PagedResponse<AppBase>> {
        if namespace.trim().is_empty() {
            return Err(AppError::validation("namespace is required"));
        }
        let records = self.store.list_apps(namespace, page).await?;
        let items = records
            .items
            .into_iter()
            .map(|record| self.to_base(record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(PagedResponse {
            page: records.page,
            total_count: records.total_count,
            items,
        })
    }

    pub async fn update_app_status(&self, id: &AppId, status: AppStatus) -> AppResult<AppBase> {
        let current = self.get_app(id).await?;
        if current.status != status
            && self
                .store
                .update_app_status(id, current.status, status)
                .await?
        {
            tracing::info!(app_id = %id, from = current.status.as_str(), to = status.as_str(), "app status changed");
        }
        self.get_app(id).await
    }

    /// Typed instance for the app, built by its listing's factory.
    pub async fn get_installed_app(&self, id: &AppId) -> AppResult<InstalledApp> {
        let base = self.get_app(id).await?;
        let item = self.registry.get(base.app_type)?;
        item.factory.new_app(base).await
    }

    pub async fn validate_customer(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
        capabilities: &[CapabilityType],
    ) -> AppResult<()> {
        ensure_same_namespace(app_id, customer_id)?;
        customer_id.validate()?;
        let app = self.get_installed_app(app_id).await?;
        app.validate_customer(customer_id, capabilities)
            .await
            .with_context(|| format!("validate customer {customer_id} for app {app_id}"))
    }

    pub async fn get_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<CustomerData> {
        ensure_same_namespace(app_id, customer_id)?;
        let app = self.get_installed_app(app_id).await?;
        app.get_customer_data(customer_id).await
    }

    pub async fn upsert_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
        data: CustomerData,
    ) -> AppResult<()> {
        ensure_same_namespace(app_id, customer_id)?;
        customer_id.validate()?;
        let app = self.get_installed_app(app_id).await?;
        app.upsert_customer_data(customer_id, data)
            .await
            .with_context(|| format!("upsert customer data {customer_id} for app {app_id}"))
    }

    pub async fn delete_customer_data(
        &self,
        app_id: &AppId,
        customer_id: &CustomerId,
    ) -> AppResult<()> {
        ensure_same_namespace(app_id, customer_id)?;
        let app = self.get_installed_app(app_id).await?;
        app.delete_customer_data(customer_id).await
    }

    pub async fn validate_invoice(&self, app_id: &AppId, invoice: &Invoice) -> AppResult<()> {
        ensure_same_namespace(app_id, &invoice.customer())?;
        let app = self.get_installed_app(app_id).await?;
        app.validate_invoice(invoice)
            .await
            .with_context(|| format!("validate invoice {}", invoice.id))
    }

    /// Callers must serialize calls for the same invoice.
    pub async fn upsert_invoice(&self, app_id: &AppId, invoice: &Invoice) -> AppResult<SyncResult> {
        ensure_same_namespace(app_id, &invoice.customer())?;
        let app = self.get_installed_app(app_id).await?;
        app.upsert_invoice(invoice)
            .await
            .with_context(|| format!("upsert invoice {}", invoice.id))
    }

    pub async fn delete_invoice(&self, app_id: &AppId, invoice: &Invoice) -> AppResult<()> {
        ensure_same_namespace(app_id, &invoice.customer())?;
        let app = self.get_installed_app(app_id).await?;
        app.delete_invoice(invoice)
            .await
            .with_context(|| format!("delete invoice {}", invoice.id))
    }

    pub async fn finalize_invoice(
        &self,
        app_id: &AppId,
        invoice: &Invoice,
    ) -> AppResult<FinalizeInvoiceResult> {
        ensure_same_namespace(app_id, &invoice.customer())?;
        let app = self.get_installed_app(app_id).await?;
        app.finalize_invoice(invoice)
            .await
            .with_context(|| format!("finalize invoice {}", invoice.id))
    }

    fn to_base(&self, record: AppRecord) -> AppResult<AppBase> {
        let listing = self.registry.get_listing(record.app_type)?.clone();
        Ok(AppBase::from_record(record, listing))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::apps::models::CreateAppInput;
    use crate::apps::testing::{InMemoryAppStore, NoopFactory};
    use crate::marketplace::Capability;

    fn service(store: Arc<InMemoryAppStore>) -> AppService {
        let mut registry = MarketplaceRegistry::new();
        registry
            .register(
                AppListing {
                    app_type: AppType::Sandbox,
                    name: "Sandbox".into(),
                    description: "test".into(),
                    icon_url: "/sandbox.svg".into(),
                    capabilities: vec![Capability::invoice_customers()],
                },
                Arc::new(NoopFactory),
            )
            .unwrap();
        AppService::new(Arc::new(registry), store)
    }

    async fn seed(store: &InMemoryAppStore, namespace: &str) -> AppId {
        let id = AppId::generate(namespace);
        store
            .create_app(CreateAppInput {
                id: id.clone(),
                app_type: AppType::Sandbox,
                name: "Sandbox".into(),
                description: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn api_key_install_is_rejected_for_noop_factory() {
        let service = service(Arc::new(InMemoryAppStore::default()));
        let err = service
            .install_with_api_key(
                AppType::Sandbox,
                InstallWithApiKeyInput {
                    namespace: "acme".into(),
                    api_key: "sk_test_1".into(),
                    name: None,
                    base_url: "http://localhost".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn install_of_unregistered_type_is_not_found() {
        let service = service(Arc::new(InMemoryAppStore::default()));
        let err = service
            .install(
                AppType::Stripe,
                InstallInput {
                    namespace: "acme".into(),
                    name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_apps_is_scoped_to_namespace() {
        let store = Arc::new(InMemoryAppStore::default());
        let service = service(store.clone());
        let acme = seed(&store, "acme").await;
        seed(&store, "globex").await;

        let page = service.list_apps("acme", Page::default()).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].id, acme);
        assert_eq!(page.items[0].listing.app_type, AppType::Sandbox);
    }

    #[tokio::test]
    async fn uninstall_removes_row_and_second_call_is_not_found() {
        let store = Arc::new(InMemoryAppStore::default());
        let service = service(store.clone());
        let id = seed(&store, "acme").await;

        service.uninstall(&id).await.unwrap();
        assert!(service.get_app(&id).await.unwrap_err().is_not_found());
        assert!(service.uninstall(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn cross_namespace_customer_is_rejected() {
        let store = Arc::new(InMemoryAppStore::default());
        let service = service(store.clone());
        let id = seed(&store, "acme").await;

        let err = service
            .validate_customer(
                &id,
                &CustomerId::new("globex", "cust_1"),
                &[CapabilityType::InvoiceCustomers],
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn status_update_is_visible_on_next_read() {
        let store = Arc::new(InMemoryAppStore::default());
        let service = service(store.clone());
        let id = seed(&store, "acme").await;

        let updated = service
            .update_app_status(&id, AppStatus::Unauthorized)
            .await
            .unwrap();
        assert_eq!(updated.status, AppStatus::Unauthorized);
        assert_eq!(
            service.get_app(&id).await.unwrap().status,
            AppStatus::Unauthorized
        );
    }
}
