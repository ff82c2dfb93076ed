use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::apps::{
    AppBase, AppFactory, AppId, AppStore, CreateAppInput, InstallWithApiKeyInput, InstalledApp,
};
use crate::error::{AppError, AppResult, ResultExt};
use crate::marketplace::{AppListing, AppType, Capability};
use crate::secrets::{SecretRef, SecretStore, STRIPE_API_KEY_SECRET, STRIPE_WEBHOOK_SECRET};

use super::app::StripeApp;
use super::client::StripeClientFactory;
use super::models::{
    SetupWebhookParams, StripeAppData, METADATA_APP_ID, METADATA_NAMESPACE, WEBHOOK_EVENT_TYPES,
};

pub fn listing() -> AppListing {
    AppListing {
        app_type: AppType::Stripe,
        name: "Stripe".into(),
        description: "Send invoices, calculate tax and collect payments with Stripe.".into(),
        icon_url: "/images/apps/stripe.png".into(),
        capabilities: vec![
            Capability::calculate_tax(),
            Capability::invoice_customers(),
            Capability::collect_payments(),
        ],
    }
}

/// Live or test mode, from Stripe's key prefix convention.
pub fn is_livemode_key(api_key: &str) -> AppResult<bool> {
    if api_key.starts_with("sk_live_") || api_key.starts_with("rk_live_") {
        Ok(true)
    } else if api_key.starts_with("sk_test_") || api_key.starts_with("rk_test_") {
        Ok(false)
    } else {
        Err(AppError::validation(
            "stripe api key must start with sk_live_, sk_test_, rk_live_ or rk_test_",
        ))
    }
}

/// `sk_live_****wxyz`
pub fn mask_api_key(api_key: &str) -> String {
    let prefix_len = api_key
        .match_indices('_')
        .nth(1)
        .map(|(index, _)| index + 1)
        .unwrap_or(0);
    let chars: Vec<char> = api_key[prefix_len..].chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}****{tail}", &api_key[..prefix_len])
}

pub fn webhook_url(base_url: &str, app_id: &AppId) -> String {
    format!(
        "{}/api/v1/apps/{}/stripe/webhook",
        base_url.trim_end_matches('/'),
        app_id.id
    )
}

/// Side effects already applied by a running install. Nothing is rolled back
/// on failure; the list is logged so the leftovers can be cleaned up by hand.
struct InstallProgress {
    app_id: AppId,
    completed: Vec<String>,
}

impl InstallProgress {
    fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            completed: Vec::new(),
        }
    }

    fn record(&mut self, step: impl Into<String>) {
        self.completed.push(step.into());
    }

    fn fail(&self, err: AppError) -> AppError {
        if !self.completed.is_empty() {
            tracing::warn!(
                app_id = %self.app_id,
                orphaned = ?self.completed,
                error = %err,
                "stripe install failed after side effects"
            );
        }
        err
    }
}

#[derive(Clone)]
pub struct StripeAppFactory {
    store: Arc<dyn AppStore>,
    secrets: Arc<dyn SecretStore>,
    clients: Arc<dyn StripeClientFactory>,
}

impl StripeAppFactory {
    pub fn new(
        store: Arc<dyn AppStore>,
        secrets: Arc<dyn SecretStore>,
        clients: Arc<dyn StripeClientFactory>,
    ) -> Self {
        Self {
            store,
            secrets,
            clients,
        }
    }

    async fn store_secret(
        &self,
        progress: &mut InstallProgress,
        key: &str,
        value: &str,
    ) -> AppResult<SecretRef> {
        let secret_ref = self
            .secrets
            .create_secret(&progress.app_id, key, value)
            .await
            .with_context(|| format!("store {key} secret"))
            .map_err(|err| progress.fail(err))?;
        progress.record(format!("secret {} ({key})", secret_ref.id));
        Ok(secret_ref)
    }
}

#[async_trait]
impl AppFactory for StripeAppFactory {
    async fn new_app(&self, base: AppBase) -> AppResult<InstalledApp> {
        let data = self
            .store
            .get_stripe_app_data(&base.id)
            .await
            .context("load stripe app data")?;
        Ok(InstalledApp::Stripe(StripeApp::new(
            base,
            data,
            self.store.clone(),
            self.secrets.clone(),
            self.clients.clone(),
        )))
    }

    async fn install_with_api_key(&self, input: InstallWithApiKeyInput) -> AppResult<AppId> {
        if input.namespace.trim().is_empty() {
            return Err(AppError::validation("namespace is required"));
        }
        if input.api_key.trim().is_empty() {
            return Err(AppError::validation("api key is required"));
        }
        if input.base_url.trim().is_empty() {
            return Err(AppError::validation("webhook base url is required"));
        }
        let livemode = is_livemode_key(&input.api_key)?;

        let client = self.clients.client(&input.api_key)?;
        let account = client
            .get_account()
            .await
            .context("get stripe account")?;

        let app_id = AppId::generate(input.namespace.clone());
        let mut progress = InstallProgress::new(app_id.clone());

        let api_key = self
            .store_secret(&mut progress, STRIPE_API_KEY_SECRET, &input.api_key)
            .await?;

        let endpoint = client
            .setup_webhook(SetupWebhookParams {
                url: webhook_url(&input.base_url, &app_id),
                event_types: WEBHOOK_EVENT_TYPES.iter().map(|e| e.to_string()).collect(),
                metadata: BTreeMap::from([
                    (METADATA_NAMESPACE.to_string(), app_id.namespace.clone()),
                    (METADATA_APP_ID.to_string(), app_id.id.to_string()),
                ]),
            })
            .await
            .context("setup stripe webhook")
            .map_err(|err| progress.fail(err))?;
        progress.record(format!("webhook endpoint {}", endpoint.id));

        let webhook_secret = self
            .store_secret(&mut progress, STRIPE_WEBHOOK_SECRET, &endpoint.secret)
            .await?;

        let data = StripeAppData {
            account_id: account.id.clone(),
            livemode,
            masked_api_key: mask_api_key(&input.api_key),
            api_key,
            webhook_secret,
            webhook_endpoint_id: endpoint.id,
        };
        self.store
            .create_stripe_app(
                CreateAppInput {
                    id: app_id.clone(),
                    app_type: AppType::Stripe,
                    name: input.name.unwrap_or_else(|| "Stripe".to_string()),
                    description: Some(format!("Stripe account {}", account.id)),
                    metadata: json!({}),
                },
                data,
            )
            .await
            .context("persist stripe app")
            .map_err(|err| progress.fail(err))?;

        tracing::info!(%app_id, account_id = %account.id, livemode, "stripe app installed");
        Ok(app_id)
    }

    async fn uninstall(&self, app: &AppBase) -> AppResult<()> {
        let data = self
            .store
            .get_stripe_app_data(&app.id)
            .await
            .context("load stripe app data")?;
        let secret = self
            .secrets
            .get_secret(&data.api_key)
            .await
            .context("resolve stripe api key")?;
        let client = self.clients.client(&secret.value)?;

        match client.delete_webhook(&data.webhook_endpoint_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() || err.is_authentication() => {
                tracing::info!(
                    app_id = %app.id,
                    webhook_endpoint_id = %data.webhook_endpoint_id,
                    error = %err,
                    "stripe webhook already gone"
                );
            }
            Err(err) => return Err(AppError::from(err)).context("delete stripe webhook"),
        }
        Ok(())
    }
}
