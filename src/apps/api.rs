use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::extractor::AuthNamespace;
use crate::marketplace::{AppListing, AppType};
use crate::pagination::{Page, PagedResponse};
use crate::stripe::models::StripeCheckoutSession;
use crate::stripe::CreateCheckoutSessionInput;

use super::models::{AppBase, AppId, CustomerData, CustomerId, InstallInput, InstallWithApiKeyInput};
use super::service::AppService;

#[derive(Debug, Deserialize)]
pub struct InstallWithApiKeyRequest {
    pub api_key: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstallRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub customer_id: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    pub success_url: String,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

pub async fn list_listings(
    Extension(service): Extension<AppService>,
    Query(page): Query<Page>,
) -> AppResult<Json<PagedResponse<AppListing>>> {
    Ok(Json(service.list_listings(page)?))
}

pub async fn get_listing(
    Extension(service): Extension<AppService>,
    Path(app_type): Path<String>,
) -> AppResult<Json<AppListing>> {
    let app_type: AppType = app_type.parse()?;
    Ok(Json(service.get_listing(app_type)?))
}

pub async fn install_with_api_key(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path(app_type): Path<String>,
    Json(payload): Json<InstallWithApiKeyRequest>,
) -> AppResult<(StatusCode, Json<AppBase>)> {
    let app_type: AppType = app_type.parse()?;
    let app = service
        .install_with_api_key(
            app_type,
            InstallWithApiKeyInput {
                namespace: auth.namespace,
                api_key: payload.api_key,
                name: payload.name,
                base_url: crate::config::APP_PUBLIC_BASE_URL.clone(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn install(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path(app_type): Path<String>,
    Json(payload): Json<InstallRequest>,
) -> AppResult<(StatusCode, Json<AppBase>)> {
    let app_type: AppType = app_type.parse()?;
    let app = service
        .install(
            app_type,
            InstallInput {
                namespace: auth.namespace,
                name: payload.name,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn list_apps(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Query(page): Query<Page>,
) -> AppResult<Json<PagedResponse<AppBase>>> {
    Ok(Json(service.list_apps(&auth.namespace, page).await?))
}

pub async fn get_app(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path(app_id): Path<Uuid>,
) -> AppResult<Json<AppBase>> {
    let id = AppId::new(auth.namespace, app_id);
    Ok(Json(service.get_app(&id).await?))
}

pub async fn uninstall(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path(app_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    service
        .uninstall(&AppId::new(auth.namespace, app_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_customer_data(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path((app_id, customer_id)): Path<(Uuid, String)>,
) -> AppResult<Json<CustomerData>> {
    let app = AppId::new(auth.namespace.clone(), app_id);
    let customer = CustomerId::new(auth.namespace, customer_id);
    Ok(Json(service.get_customer_data(&app, &customer).await?))
}

pub async fn upsert_customer_data(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path((app_id, customer_id)): Path<(Uuid, String)>,
    Json(data): Json<CustomerData>,
) -> AppResult<StatusCode> {
    let app = AppId::new(auth.namespace.clone(), app_id);
    let customer = CustomerId::new(auth.namespace, customer_id);
    service.upsert_customer_data(&app, &customer, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_customer_data(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path((app_id, customer_id)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    let app = AppId::new(auth.namespace.clone(), app_id);
    let customer = CustomerId::new(auth.namespace, customer_id);
    service.delete_customer_data(&app, &customer).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_checkout_session(
    Extension(service): Extension<AppService>,
    auth: AuthNamespace,
    Path(app_id): Path<Uuid>,
    Json(payload): Json<CheckoutSessionRequest>,
) -> AppResult<(StatusCode, Json<StripeCheckoutSession>)> {
    let id = AppId::new(auth.namespace.clone(), app_id);
    let app = service.get_installed_app(&id).await?;
    let session = app
        .as_stripe()?
        .create_checkout_session(CreateCheckoutSessionInput {
            customer_id: CustomerId::new(auth.namespace, payload.customer_id),
            customer_name: payload.customer_name,
            customer_email: payload.customer_email,
            currency: payload.currency,
            success_url: payload.success_url,
            cancel_url: payload.cancel_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}
