use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::apps::{AppService, AppStore, CustomerId};
use crate::error::{AppError, AppResult, ResultExt};
use crate::secrets::SecretStore;

use super::models::{METADATA_APP_ID, METADATA_CUSTOMER_ID, METADATA_NAMESPACE};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const SETUP_INTENT_SUCCEEDED: &str = "setup_intent.succeeded";

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
struct SetupIntentObject {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    metadata: std::collections::BTreeMap<String, String>,
}

/// Outcome of one delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored,
}

/// Verifies a `t=...,v1=...` signature header and parses the event.
///
/// `now` is unix seconds; timestamps further than `tolerance_secs` away are rejected.
pub fn construct_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> AppResult<StripeEvent> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::validation("stripe signature header has no timestamp"))?;
    if signatures.is_empty() {
        return Err(AppError::validation(
            "stripe signature header has no v1 signature",
        ));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(AppError::validation(
            "stripe signature timestamp outside tolerance",
        ));
    }

    let verified = signatures.iter().any(|signature| {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });
    if !verified {
        return Err(AppError::validation("stripe signature mismatch"));
    }

    serde_json::from_slice(payload)
        .map_err(|err| AppError::validation(format!("malformed stripe event: {err}")))
}

/// Signature header for `payload`, as Stripe would send it.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| AppError::validation(format!("invalid webhook secret: {err}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// key: stripe-webhook -> verified event routing
#[derive(Clone)]
pub struct WebhookDispatcher {
    apps: AppService,
    store: Arc<dyn AppStore>,
    secrets: Arc<dyn SecretStore>,
    tolerance_secs: i64,
}

impl WebhookDispatcher {
    pub fn new(
        apps: AppService,
        store: Arc<dyn AppStore>,
        secrets: Arc<dyn SecretStore>,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            apps,
            store,
            secrets,
            tolerance_secs,
        }
    }

    pub async fn handle(
        &self,
        app_id: Uuid,
        payload: &[u8],
        signature_header: &str,
    ) -> AppResult<WebhookOutcome> {
        let data = self.store.get_stripe_app_by_id(app_id).await?;
        let secret = self
            .secrets
            .get_secret(&data.webhook_secret)
            .await
            .context("resolve stripe webhook secret")?;
        // The namespace comes from the secret record, never from the request.
        let app_id = secret.secret_ref.app_id.clone();

        let event = construct_event(
            payload,
            signature_header,
            &secret.value,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )?;
        tracing::debug!(%app_id, event_id = %event.id, event_type = %event.event_type, "stripe event received");

        match event.event_type.as_str() {
            SETUP_INTENT_SUCCEEDED => {
                let intent: SetupIntentObject = serde_json::from_value(event.data.object)
                    .map_err(|err| {
                        AppError::validation(format!("malformed setup intent: {err}"))
                    })?;

                let Some(metadata_app_id) = intent.metadata.get(METADATA_APP_ID) else {
                    tracing::info!(%app_id, setup_intent = %intent.id, "setup intent not created by this app, ignoring");
                    return Ok(WebhookOutcome::Ignored);
                };
                if metadata_app_id != &app_id.id.to_string() {
                    return Err(AppError::validation(format!(
                        "setup intent {} belongs to app {metadata_app_id}, not {}",
                        intent.id, app_id.id
                    )));
                }
                if let Some(namespace) = intent.metadata.get(METADATA_NAMESPACE) {
                    if namespace != &app_id.namespace {
                        return Err(AppError::validation(format!(
                            "setup intent {} namespace does not match app",
                            intent.id
                        )));
                    }
                }

                let customer_id = intent.metadata.get(METADATA_CUSTOMER_ID).ok_or_else(|| {
                    AppError::validation(format!("setup intent {} has no customer id", intent.id))
                })?;
                let external_customer_id = intent.customer.ok_or_else(|| {
                    AppError::validation(format!("setup intent {} has no customer", intent.id))
                })?;
                let payment_method_id = intent.payment_method.ok_or_else(|| {
                    AppError::validation(format!(
                        "setup intent {} has no payment method",
                        intent.id
                    ))
                })?;

                let app = self.apps.get_installed_app(&app_id).await?;
                app.as_stripe()?
                    .update_default_payment_method(
                        &CustomerId::new(app_id.namespace.clone(), customer_id.clone()),
                        &external_customer_id,
                        &payment_method_id,
                    )
                    .await
                    .with_context(|| format!("handle setup intent {}", intent.id))?;
                Ok(WebhookOutcome::Applied)
            }
            other => Err(AppError::validation(format!(
                "unsupported stripe event type: {other}"
            ))),
        }
    }
}
