use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::stripe::webhook::SIGNATURE_HEADER;
use crate::stripe::{WebhookDispatcher, WebhookOutcome};

/// key: webhooks-stripe -> signed provider entrypoint
///
/// Unauthenticated; the signature and the stored secret are the only trust anchors.
pub async fn stripe_webhook(
    Extension(dispatcher): Extension<WebhookDispatcher>,
    Path(app_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::validation("missing stripe signature header"))?;

    let outcome = dispatcher.handle(app_id, &body, signature).await?;
    let status = match outcome {
        WebhookOutcome::Applied => "applied",
        WebhookOutcome::Ignored => "ignored",
    };
    Ok(Json(json!({ "status": status })))
}
