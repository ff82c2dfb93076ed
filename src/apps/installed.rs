use crate::billing::{FinalizeInvoiceResult, Invoice, SyncResult};
use crate::error::{AppError, AppResult};
use crate::marketplace::{AppType, CapabilityType};
use crate::sandbox::SandboxApp;
use crate::stripe::StripeApp;

use super::models::{AppBase, CustomerData, CustomerId};

/// key: apps-installed -> closed union of app implementations
///
/// Each variant carries the shared [`AppBase`] plus its own provider data and
/// exposes the same capability-checked operation set.
pub enum InstalledApp {
    Stripe(StripeApp),
    Sandbox(SandboxApp),
}

impl InstalledApp {
    pub fn base(&self) -> &AppBase {
        match self {
            InstalledApp::Stripe(app) => app.base(),
            InstalledApp::Sandbox(app) => app.base(),
        }
    }

    pub fn app_type(&self) -> AppType {
        self.base().app_type
    }

    pub fn as_stripe(&self) -> AppResult<&StripeApp> {
        match self {
            InstalledApp::Stripe(app) => Ok(app),
            other => Err(AppError::validation(format!(
                "app {} is a {} app, not stripe",
                other.base().id,
                other.app_type()
            ))),
        }
    }

    pub async fn validate_customer(
        &self,
        customer_id: &CustomerId,
        capabilities: &[CapabilityType],
    ) -> AppResult<()> {
        match self {
            InstalledApp::Stripe(app) => app.validate_customer(customer_id, capabilities).await,
            InstalledApp::Sandbox(app) => app.validate_customer(customer_id, capabilities).await,
        }
    }

    pub async fn get_customer_data(&self, customer_id: &CustomerId) -> AppResult<CustomerData> {
        match self {
            InstalledApp::Stripe(app) => app
                .get_customer_data(customer_id)
                .await
                .map(CustomerData::Stripe),
            InstalledApp::Sandbox(app) => app.get_customer_data(customer_id).await,
        }
    }

    pub async fn upsert_customer_data(
        &self,
        customer_id: &CustomerId,
        data: CustomerData,
    ) -> AppResult<()> {
        match (self, data) {
            (InstalledApp::Stripe(app), CustomerData::Stripe(data)) => {
                app.upsert_customer_data(customer_id, data).await
            }
            (InstalledApp::Sandbox(app), CustomerData::Sandbox) => {
                app.upsert_customer_data(customer_id).await
            }
            (app, _) => Err(AppError::validation(format!(
                "customer data does not match app type {}",
                app.app_type()
            ))),
        }
    }

    pub async fn delete_customer_data(&self, customer_id: &CustomerId) -> AppResult<()> {
        match self {
            InstalledApp::Stripe(app) => app.delete_customer_data(customer_id).await,
            InstalledApp::Sandbox(app) => app.delete_customer_data(customer_id).await,
        }
    }

    /// Customer gate for invoicing. Run before [`InstalledApp::upsert_invoice`].
    pub async fn validate_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        match self {
            InstalledApp::Stripe(app) => app.validate_invoice(invoice).await,
            InstalledApp::Sandbox(app) => app.validate_invoice(invoice).await,
        }
    }

    pub async fn upsert_invoice(&self, invoice: &Invoice) -> AppResult<SyncResult> {
        match self {
            InstalledApp::Stripe(app) => app.upsert_invoice(invoice).await,
            InstalledApp::Sandbox(app) => app.upsert_invoice(invoice).await,
        }
    }

    pub async fn delete_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        match self {
            InstalledApp::Stripe(app) => app.delete_invoice(invoice).await,
            InstalledApp::Sandbox(app) => app.delete_invoice(invoice).await,
        }
    }

    pub async fn finalize_invoice(&self, invoice: &Invoice) -> AppResult<FinalizeInvoiceResult> {
        match self {
            InstalledApp::Stripe(app) => app.finalize_invoice(invoice).await,
            InstalledApp::Sandbox(app) => app.finalize_invoice(invoice).await,
        }
    }
}
