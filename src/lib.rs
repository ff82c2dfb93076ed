pub mod apps;
pub mod billing;
pub mod config;
pub mod error;
pub mod extractor;
pub mod marketplace;
pub mod pagination;
pub mod routes;
pub mod sandbox;
pub mod secrets;
pub mod stripe;
pub mod vault;
pub mod webhooks;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::apps::{AppService, AppStore};
use crate::error::AppResult;
use crate::marketplace::MarketplaceRegistry;
use crate::sandbox::SandboxAppFactory;
use crate::secrets::SecretStore;
use crate::stripe::{StripeAppFactory, StripeClientFactory, WebhookDispatcher};

async fn root() -> &'static str {
    "App Marketplace API"
}

/// Registry with every app type this service ships.
pub fn build_registry(
    store: Arc<dyn AppStore>,
    secrets: Arc<dyn SecretStore>,
    clients: Arc<dyn StripeClientFactory>,
) -> AppResult<MarketplaceRegistry> {
    let mut registry = MarketplaceRegistry::new();
    registry.register(
        stripe::listing(),
        Arc::new(StripeAppFactory::new(store.clone(), secrets, clients)),
    )?;
    registry.register(
        sandbox::listing(),
        Arc::new(SandboxAppFactory::new(store)),
    )?;
    Ok(registry)
}

/// key: app-wiring -> services shared by handlers
#[derive(Clone)]
pub struct AppContext {
    pub apps: AppService,
    pub webhooks: WebhookDispatcher,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn AppStore>,
        secrets: Arc<dyn SecretStore>,
        clients: Arc<dyn StripeClientFactory>,
        webhook_tolerance_secs: i64,
    ) -> AppResult<Self> {
        let registry = build_registry(store.clone(), secrets.clone(), clients)?;
        let apps = AppService::new(Arc::new(registry), store.clone());
        let webhooks = WebhookDispatcher::new(apps.clone(), store, secrets, webhook_tolerance_secs);
        Ok(Self { apps, webhooks })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .merge(routes::api_routes())
            .layer(Extension(self.apps.clone()))
            .layer(Extension(self.webhooks.clone()))
    }
}
