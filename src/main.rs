use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use app_marketplace::apps::{AppStore, PgAppStore};
use app_marketplace::config;
use app_marketplace::secrets::{PgSecretStore, SecretStore};
use app_marketplace::stripe::{HttpStripeClientFactory, StripeClientFactory};
use app_marketplace::vault::VaultSecretStore;
use app_marketplace::AppContext;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await
        .context("connect to database")?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error).context("run database migrations");
        }
    }

    let store: Arc<dyn AppStore> = Arc::new(PgAppStore::new(pool.clone()));
    let secrets: Arc<dyn SecretStore> = match VaultSecretStore::from_env()? {
        Some(vault) => {
            tracing::info!("using vault secret store");
            Arc::new(vault)
        }
        None => Arc::new(PgSecretStore::new(pool.clone(), config::SECRET_KEY.as_str())),
    };
    let clients: Arc<dyn StripeClientFactory> =
        Arc::new(HttpStripeClientFactory::new(config::STRIPE_API_BASE.as_str()));

    let context = AppContext::new(
        store,
        secrets,
        clients,
        *config::STRIPE_WEBHOOK_TOLERANCE_SECS,
    )?;

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = context
        .router()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("parse bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
