//! Provider-less app that accepts every invoicing call and mints local ids.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::apps::{
    ensure_same_namespace, AppBase, AppFactory, AppId, AppStore, CreateAppInput, CustomerData,
    CustomerId, InstallInput, InstalledApp,
};
use crate::billing::{FinalizeInvoiceResult, Invoice, SyncResult};
use crate::error::{AppError, AppResult, NotFoundKind};
use crate::marketplace::{AppListing, AppType, Capability, CapabilityType};

pub fn listing() -> AppListing {
    AppListing {
        app_type: AppType::Sandbox,
        name: "Sandbox".into(),
        description: "Local app for testing invoicing flows without a payment provider.".into(),
        icon_url: "/images/apps/sandbox.svg".into(),
        capabilities: vec![
            Capability::calculate_tax(),
            Capability::invoice_customers(),
            Capability::collect_payments(),
        ],
    }
}

fn mint(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

pub struct SandboxApp {
    base: AppBase,
    store: Arc<dyn AppStore>,
}

impl SandboxApp {
    pub fn new(base: AppBase, store: Arc<dyn AppStore>) -> Self {
        Self { base, store }
    }

    pub fn base(&self) -> &AppBase {
        &self.base
    }

    pub async fn validate_customer(
        &self,
        customer_id: &CustomerId,
        capabilities: &[CapabilityType],
    ) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.base.listing.validate_capabilities(capabilities)?;
        if self
            .store
            .get_customer_data(&self.base.id, customer_id)
            .await?
            .is_none()
        {
            return Err(AppError::precondition(format!(
                "customer {customer_id} has no data for sandbox app {}",
                self.base.id
            )));
        }
        Ok(())
    }

    pub async fn get_customer_data(&self, customer_id: &CustomerId) -> AppResult<CustomerData> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.store
            .get_customer_data(&self.base.id, customer_id)
            .await?
            .ok_or_else(|| AppError::not_found(NotFoundKind::CustomerData, customer_id))
    }

    pub async fn upsert_customer_data(&self, customer_id: &CustomerId) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.store
            .upsert_customer_data(&self.base.id, customer_id, &CustomerData::Sandbox)
            .await
    }

    pub async fn delete_customer_data(&self, customer_id: &CustomerId) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.store
            .delete_customer_data(&self.base.id, customer_id)
            .await
    }

    pub async fn validate_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        self.validate_customer(
            &invoice.customer(),
            &[
                CapabilityType::InvoiceCustomers,
                CapabilityType::CollectPayments,
            ],
        )
        .await
    }

    /// Keeps ids that were already assigned and mints the rest.
    pub async fn upsert_invoice(&self, invoice: &Invoice) -> AppResult<SyncResult> {
        ensure_same_namespace(&self.base.id, &invoice.customer())?;
        self.base
            .listing
            .validate_capabilities(&[CapabilityType::InvoiceCustomers])?;

        let mut result = SyncResult {
            external_invoice_id: invoice
                .external_ids
                .invoicing
                .clone()
                .unwrap_or_else(|| mint("sandbox_in")),
            invoice_number: invoice.number.clone(),
            ..SyncResult::default()
        };
        for line in invoice.leaf_lines() {
            let external_id = line
                .external_ids
                .invoicing
                .clone()
                .unwrap_or_else(|| mint("sandbox_il"));
            result.line_external_ids.insert(line.id.clone(), external_id);
            for discount in line.discounts.iter().filter(|d| d.deleted_at.is_none()) {
                let external_id = discount
                    .external_ids
                    .invoicing
                    .clone()
                    .unwrap_or_else(|| mint("sandbox_il"));
                result
                    .discount_external_ids
                    .insert(discount.id.clone(), external_id);
            }
        }
        Ok(result)
    }

    pub async fn delete_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, &invoice.customer())
    }

    pub async fn finalize_invoice(&self, invoice: &Invoice) -> AppResult<FinalizeInvoiceResult> {
        ensure_same_namespace(&self.base.id, &invoice.customer())?;
        Ok(FinalizeInvoiceResult {
            invoice_number: Some(
                invoice
                    .number
                    .clone()
                    .unwrap_or_else(|| format!("SANDBOX-{}", invoice.id)),
            ),
            payment_external_id: Some(mint("sandbox_pi")),
        })
    }
}

#[derive(Clone)]
pub struct SandboxAppFactory {
    store: Arc<dyn AppStore>,
}

impl SandboxAppFactory {
    pub fn new(store: Arc<dyn AppStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AppFactory for SandboxAppFactory {
    async fn new_app(&self, base: AppBase) -> AppResult<InstalledApp> {
        Ok(InstalledApp::Sandbox(SandboxApp::new(
            base,
            self.store.clone(),
        )))
    }

    async fn install(&self, input: InstallInput) -> AppResult<AppId> {
        if input.namespace.trim().is_empty() {
            return Err(AppError::validation("namespace is required"));
        }
        let id = AppId::generate(input.namespace);
        self.store
            .create_app(CreateAppInput {
                id: id.clone(),
                app_type: AppType::Sandbox,
                name: input.name.unwrap_or_else(|| "Sandbox".to_string()),
                description: None,
                metadata: json!({}),
            })
            .await?;
        Ok(id)
    }

    async fn uninstall(&self, _app: &AppBase) -> AppResult<()> {
        Ok(())
    }
}
