use axum::{
    routing::{get, post},
    Router,
};

use crate::{apps::api, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/v1/marketplace/listings", get(api::list_listings))
        .route("/api/v1/marketplace/listings/:app_type", get(api::get_listing))
        .route(
            "/api/v1/marketplace/listings/:app_type/install",
            post(api::install),
        )
        .route(
            "/api/v1/marketplace/listings/:app_type/install/api-key",
            post(api::install_with_api_key),
        )
        .route("/api/v1/apps", get(api::list_apps))
        .route(
            "/api/v1/apps/:app_id",
            get(api::get_app).delete(api::uninstall),
        )
        .route(
            "/api/v1/apps/:app_id/customers/:customer_id/data",
            get(api::get_customer_data)
                .put(api::upsert_customer_data)
                .delete(api::delete_customer_data),
        )
        .route(
            "/api/v1/apps/:app_id/stripe/checkout-sessions",
            post(api::create_checkout_session),
        )
        .route(
            "/api/v1/apps/:app_id/stripe/webhook",
            post(webhooks::stripe_webhook),
        )
}
