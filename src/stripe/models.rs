use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::secrets::SecretRef;

/// Events the installed webhook endpoint subscribes to.
pub const WEBHOOK_EVENT_TYPES: &[&str] = &[
    "setup_intent.succeeded",
    "setup_intent.setup_failed",
    "setup_intent.requires_action",
    "invoice.finalization_failed",
    "invoice.marked_uncollectible",
    "invoice.overdue",
    "invoice.paid",
    "invoice.payment_action_required",
    "invoice.payment_failed",
    "invoice.payment_succeeded",
    "invoice.sent",
    "invoice.voided",
];

pub const METADATA_NAMESPACE: &str = "om_namespace";
pub const METADATA_APP_ID: &str = "om_app_id";
pub const METADATA_CUSTOMER_ID: &str = "om_customer_id";
pub const METADATA_INVOICE_ID: &str = "om_invoice_id";
pub const METADATA_LINE_ID: &str = "om_line_id";
pub const METADATA_LINE_TYPE: &str = "om_line_type";
pub const METADATA_DISCOUNT_ID: &str = "om_discount_id";

pub const LINE_TYPE_LINE: &str = "line";
pub const LINE_TYPE_DISCOUNT: &str = "discount";

/// key: stripe-app-data -> type specific installation row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeAppData {
    pub account_id: String,
    pub livemode: bool,
    pub masked_api_key: String,
    pub api_key: SecretRef,
    pub webhook_secret: SecretRef,
    pub webhook_endpoint_id: String,
}

/// key: stripe-customer-data -> per customer provider references
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeCustomerData {
    pub external_customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_payment_method_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeAccount {
    pub id: String,
    pub default_currency: Option<String>,
    pub country: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeWebhookEndpoint {
    pub id: String,
    pub secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeCustomer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub default_payment_method_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeAddress {
    pub city: Option<String>,
    pub country: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripePaymentMethod {
    pub id: String,
    pub customer_id: Option<String>,
    pub billing_address: Option<StripeAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub setup_intent_id: Option<String>,
    pub customer_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

impl StripePeriod {
    pub fn from_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: start.timestamp(),
            end: end.timestamp(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeInvoiceLine {
    pub id: String,
    pub amount: i64,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub period: Option<StripePeriod>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeInvoice {
    pub id: String,
    pub number: Option<String>,
    pub status: Option<String>,
    pub customer_id: String,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub lines: Vec<StripeInvoiceLine>,
    /// The provider answered a reused idempotency key with the stored response,
    /// so `lines` shows the invoice as first created.
    pub replayed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupWebhookParams {
    pub url: String,
    pub event_types: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateCustomerParams {
    pub name: Option<String>,
    pub email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateCheckoutSessionParams {
    pub customer_id: String,
    pub currency: Option<String>,
    pub success_url: String,
    pub cancel_url: Option<String>,
    /// Copied into the setup intent so webhooks can route it back.
    pub setup_intent_metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateInvoiceParams {
    pub idempotency_key: String,
    pub customer_id: String,
    pub currency: String,
    pub default_payment_method_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateInvoiceParams {
    pub invoice_id: String,
    pub default_payment_method_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// key: stripe-line-add -> new provider line item
#[derive(Clone, Debug, PartialEq)]
pub struct AddInvoiceLine {
    pub description: String,
    pub amount: i64,
    pub quantity: u64,
    pub period: StripePeriod,
    pub metadata: BTreeMap<String, String>,
}

/// Full replace of an existing line item. The period is fixed at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateInvoiceLine {
    pub id: String,
    pub description: String,
    pub amount: i64,
    pub quantity: u64,
    pub metadata: BTreeMap<String, String>,
}
