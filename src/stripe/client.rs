use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{AppError, AppResult};

use super::models::{
    AddInvoiceLine, CreateCheckoutSessionParams, CreateCustomerParams, CreateInvoiceParams,
    SetupWebhookParams, StripeAccount, StripeAddress, StripeCheckoutSession, StripeCustomer,
    StripeInvoice, StripeInvoiceLine, StripePaymentMethod, StripePeriod, StripeWebhookEndpoint,
    UpdateInvoiceLine, UpdateInvoiceParams,
};

const STRIPE_API_VERSION: &str = "2024-06-20";
const LINES_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum StripeClientError {
    #[error("stripe authentication failed: {0}")]
    Authentication(String),
    #[error("stripe {resource} {id} not found")]
    NotFound { resource: &'static str, id: String },
    #[error("stripe api error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("stripe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode stripe response: {0}")]
    Decode(String),
}

impl StripeClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StripeClientError::NotFound { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, StripeClientError::Authentication(_))
    }
}

impl From<StripeClientError> for AppError {
    fn from(err: StripeClientError) -> Self {
        match err {
            StripeClientError::Authentication(message) => AppError::ProviderAuthentication(message),
            other => AppError::Provider(other.to_string()),
        }
    }
}

pub type StripeResult<T> = Result<T, StripeClientError>;

/// key: stripe-client -> external provider port
#[async_trait]
pub trait StripeClient: Send + Sync {
    async fn get_account(&self) -> StripeResult<StripeAccount>;
    async fn setup_webhook(&self, params: SetupWebhookParams) -> StripeResult<StripeWebhookEndpoint>;
    async fn delete_webhook(&self, endpoint_id: &str) -> StripeResult<()>;

    async fn get_customer(&self, customer_id: &str) -> StripeResult<StripeCustomer>;
    async fn create_customer(&self, params: CreateCustomerParams) -> StripeResult<StripeCustomer>;
    async fn update_customer_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> StripeResult<StripeCustomer>;
    async fn get_payment_method(&self, payment_method_id: &str)
        -> StripeResult<StripePaymentMethod>;
    async fn create_checkout_session(
        &self,
        params: CreateCheckoutSessionParams,
    ) -> StripeResult<StripeCheckoutSession>;

    /// A reused idempotency key yields the stored first response, flagged as
    /// replayed.
    async fn create_invoice(&self, params: CreateInvoiceParams) -> StripeResult<StripeInvoice>;
    async fn list_invoice_lines(&self, invoice_id: &str) -> StripeResult<Vec<StripeInvoiceLine>>;
    /// Returns the invoice with every current line item.
    async fn update_invoice(&self, params: UpdateInvoiceParams) -> StripeResult<StripeInvoice>;
    async fn delete_invoice(&self, invoice_id: &str) -> StripeResult<()>;
    async fn finalize_invoice(&self, invoice_id: &str) -> StripeResult<StripeInvoice>;

    async fn add_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<AddInvoiceLine>,
    ) -> StripeResult<StripeInvoice>;
    async fn update_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<UpdateInvoiceLine>,
    ) -> StripeResult<StripeInvoice>;
    async fn remove_invoice_lines(
        &self,
        invoice_id: &str,
        line_ids: Vec<String>,
    ) -> StripeResult<StripeInvoice>;
}

/// Builds API-key scoped clients. Keys are resolved per call and never cached here.
pub trait StripeClientFactory: Send + Sync {
    fn client(&self, api_key: &str) -> AppResult<Arc<dyn StripeClient>>;
}

pub struct HttpStripeClientFactory {
    base_url: String,
}

impl HttpStripeClientFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl StripeClientFactory for HttpStripeClientFactory {
    fn client(&self, api_key: &str) -> AppResult<Arc<dyn StripeClient>> {
        let client = HttpStripeClient::new(self.base_url.clone(), api_key)
            .map_err(|err| AppError::Provider(err.to_string()))?;
        Ok(Arc::new(client))
    }
}

#[derive(Clone)]
pub struct HttpStripeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpStripeClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> StripeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("Stripe-Version", STRIPE_API_VERSION)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &'static str,
        id: &str,
    ) -> StripeResult<T> {
        self.send_with_headers(request, resource, id)
            .await
            .map(|(value, _)| value)
    }

    async fn send_with_headers<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &'static str,
        id: &str,
    ) -> StripeResult<(T, HeaderMap)> {
        let response = self.auth(request).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map(|value| (value, headers))
                .map_err(|err| StripeClientError::Decode(err.to_string()));
        }

        let error = serde_json::from_slice::<WireErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_default();
        let message = error
            .message
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());

        Err(match status {
            StatusCode::UNAUTHORIZED => StripeClientError::Authentication(message),
            StatusCode::NOT_FOUND => StripeClientError::NotFound {
                resource,
                id: id.to_string(),
            },
            _ => StripeClientError::Api {
                status: status.as_u16(),
                code: error.code,
                message,
            },
        })
    }

    /// Pages in the rest of a line list, starting after the last known line.
    async fn page_lines(
        &self,
        invoice_id: &str,
        mut lines: Vec<WireInvoiceLine>,
        mut has_more: bool,
    ) -> StripeResult<Vec<WireInvoiceLine>> {
        while has_more {
            let mut query = vec![("limit", LINES_PAGE_SIZE.to_string())];
            if let Some(last) = lines.last() {
                query.push(("starting_after", last.id.clone()));
            }
            let page: WireList<WireInvoiceLine> = self
                .send(
                    self.client
                        .get(self.endpoint(&format!("invoices/{invoice_id}/lines")))
                        .query(&query),
                    "invoice",
                    invoice_id,
                )
                .await?;
            has_more = page.has_more && !page.data.is_empty();
            lines.extend(page.data);
        }
        Ok(lines)
    }

    async fn invoice_from_wire(&self, wire: WireInvoice) -> StripeResult<StripeInvoice> {
        let lines = self
            .page_lines(&wire.id, wire.lines.data, wire.lines.has_more)
            .await?;

        Ok(StripeInvoice {
            id: wire.id,
            number: wire.number,
            status: wire.status,
            customer_id: expandable_id(&wire.customer).unwrap_or_default(),
            currency: wire.currency,
            payment_intent_id: wire.payment_intent.as_ref().and_then(expandable_id),
            lines: lines.into_iter().map(StripeInvoiceLine::from).collect(),
            replayed: false,
        })
    }
}

/// Stripe returns either the id or the expanded object for references.
fn expandable_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(object) => object.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn push_metadata(params: &mut Vec<(String, String)>, prefix: &str, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("{prefix}[metadata][{key}]"), value.clone()));
    }
}

fn top_level_metadata(params: &mut Vec<(String, String)>, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("metadata[{key}]"), value.clone()));
    }
}

#[async_trait]
impl StripeClient for HttpStripeClient {
    async fn get_account(&self) -> StripeResult<StripeAccount> {
        let wire: WireAccount = self
            .send(self.client.get(self.endpoint("account")), "account", "self")
            .await?;
        Ok(StripeAccount {
            id: wire.id,
            default_currency: wire.default_currency,
            country: wire.country,
        })
    }

    async fn setup_webhook(&self, params: SetupWebhookParams) -> StripeResult<StripeWebhookEndpoint> {
        let mut form = vec![("url".to_string(), params.url.clone())];
        for event in &params.event_types {
            form.push(("enabled_events[]".to_string(), event.clone()));
        }
        form.push(("api_version".to_string(), STRIPE_API_VERSION.to_string()));
        top_level_metadata(&mut form, &params.metadata);

        let wire: WireWebhookEndpoint = self
            .send(
                self.client.post(self.endpoint("webhook_endpoints")).form(&form),
                "webhook_endpoint",
                &params.url,
            )
            .await?;
        let secret = wire.secret.ok_or_else(|| {
            StripeClientError::Decode("webhook endpoint response has no signing secret".into())
        })?;
        Ok(StripeWebhookEndpoint {
            id: wire.id,
            secret,
        })
    }

    async fn delete_webhook(&self, endpoint_id: &str) -> StripeResult<()> {
        let _: Value = self
            .send(
                self.client
                    .delete(self.endpoint(&format!("webhook_endpoints/{endpoint_id}"))),
                "webhook_endpoint",
                endpoint_id,
            )
            .await?;
        Ok(())
    }

    async fn get_customer(&self, customer_id: &str) -> StripeResult<StripeCustomer> {
        let wire: WireCustomer = self
            .send(
                self.client
                    .get(self.endpoint(&format!("customers/{customer_id}"))),
                "customer",
                customer_id,
            )
            .await?;
        if wire.deleted {
            return Err(StripeClientError::NotFound {
                resource: "customer",
                id: customer_id.to_string(),
            });
        }
        Ok(wire.into())
    }

    async fn create_customer(&self, params: CreateCustomerParams) -> StripeResult<StripeCustomer> {
        let mut form = Vec::new();
        if let Some(name) = &params.name {
            form.push(("name".to_string(), name.clone()));
        }
        if let Some(email) = &params.email {
            form.push(("email".to_string(), email.clone()));
        }
        top_level_metadata(&mut form, &params.metadata);

        let wire: WireCustomer = self
            .send(
                self.client.post(self.endpoint("customers")).form(&form),
                "customer",
                "new",
            )
            .await?;
        Ok(wire.into())
    }

    async fn update_customer_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> StripeResult<StripeCustomer> {
        let form = [(
            "invoice_settings[default_payment_method]",
            payment_method_id,
        )];
        let wire: WireCustomer = self
            .send(
                self.client
                    .post(self.endpoint(&format!("customers/{customer_id}")))
                    .form(&form),
                "customer",
                customer_id,
            )
            .await?;
        Ok(wire.into())
    }

    async fn get_payment_method(
        &self,
        payment_method_id: &str,
    ) -> StripeResult<StripePaymentMethod> {
        let wire: WirePaymentMethod = self
            .send(
                self.client
                    .get(self.endpoint(&format!("payment_methods/{payment_method_id}"))),
                "payment_method",
                payment_method_id,
            )
            .await?;
        let billing_address = wire
            .billing_details
            .and_then(|details| details.address)
            .filter(|address| address != &StripeAddress::default());
        Ok(StripePaymentMethod {
            id: wire.id,
            customer_id: wire.customer.as_ref().and_then(expandable_id),
            billing_address,
        })
    }

    async fn create_checkout_session(
        &self,
        params: CreateCheckoutSessionParams,
    ) -> StripeResult<StripeCheckoutSession> {
        let mut form = vec![
            ("mode".to_string(), "setup".to_string()),
            ("customer".to_string(), params.customer_id.clone()),
            ("success_url".to_string(), params.success_url.clone()),
        ];
        if let Some(currency) = &params.currency {
            form.push(("currency".to_string(), currency.to_ascii_lowercase()));
        }
        if let Some(cancel_url) = &params.cancel_url {
            form.push(("cancel_url".to_string(), cancel_url.clone()));
        }
        push_metadata(&mut form, "setup_intent_data", &params.setup_intent_metadata);

        let wire: WireCheckoutSession = self
            .send(
                self.client.post(self.endpoint("checkout/sessions")).form(&form),
                "checkout_session",
                &params.customer_id,
            )
            .await?;
        Ok(StripeCheckoutSession {
            id: wire.id,
            url: wire.url,
            setup_intent_id: wire.setup_intent.as_ref().and_then(expandable_id),
            customer_id: params.customer_id,
        })
    }

    async fn create_invoice(&self, params: CreateInvoiceParams) -> StripeResult<StripeInvoice> {
        let mut form = vec![
            ("customer".to_string(), params.customer_id.clone()),
            ("currency".to_string(), params.currency.to_ascii_lowercase()),
            ("auto_advance".to_string(), "false".to_string()),
            (
                "pending_invoice_items_behavior".to_string(),
                "exclude".to_string(),
            ),
        ];
        match params.due_date {
            Some(due) => {
                form.push(("collection_method".to_string(), "send_invoice".to_string()));
                form.push(("due_date".to_string(), due.timestamp().to_string()));
            }
            None => form.push((
                "collection_method".to_string(),
                "charge_automatically".to_string(),
            )),
        }
        if let Some(payment_method) = &params.default_payment_method_id {
            form.push(("default_payment_method".to_string(), payment_method.clone()));
        }
        top_level_metadata(&mut form, &params.metadata);

        let (wire, headers): (WireInvoice, _) = self
            .send_with_headers(
                self.client
                    .post(self.endpoint("invoices"))
                    .header("Idempotency-Key", &params.idempotency_key)
                    .form(&form),
                "invoice",
                "new",
            )
            .await?;
        let replayed = headers
            .get("Idempotent-Replayed")
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.eq_ignore_ascii_case("true"));
        let mut invoice = self.invoice_from_wire(wire).await?;
        invoice.replayed = replayed;
        Ok(invoice)
    }

    async fn list_invoice_lines(&self, invoice_id: &str) -> StripeResult<Vec<StripeInvoiceLine>> {
        let lines = self.page_lines(invoice_id, Vec::new(), true).await?;
        Ok(lines.into_iter().map(StripeInvoiceLine::from).collect())
    }

    async fn update_invoice(&self, params: UpdateInvoiceParams) -> StripeResult<StripeInvoice> {
        let mut form = Vec::new();
        if let Some(due) = params.due_date {
            form.push(("due_date".to_string(), due.timestamp().to_string()));
        }
        if let Some(payment_method) = &params.default_payment_method_id {
            form.push(("default_payment_method".to_string(), payment_method.clone()));
        }

        let wire: WireInvoice = self
            .send(
                self.client
                    .post(self.endpoint(&format!("invoices/{}", params.invoice_id)))
                    .form(&form),
                "invoice",
                &params.invoice_id,
            )
            .await?;
        self.invoice_from_wire(wire).await
    }

    async fn delete_invoice(&self, invoice_id: &str) -> StripeResult<()> {
        let _: Value = self
            .send(
                self.client
                    .delete(self.endpoint(&format!("invoices/{invoice_id}"))),
                "invoice",
                invoice_id,
            )
            .await?;
        Ok(())
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> StripeResult<StripeInvoice> {
        let wire: WireInvoice = self
            .send(
                self.client
                    .post(self.endpoint(&format!("invoices/{invoice_id}/finalize")))
                    .form(&[("auto_advance", "true")]),
                "invoice",
                invoice_id,
            )
            .await?;
        self.invoice_from_wire(wire).await
    }

    async fn add_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<AddInvoiceLine>,
    ) -> StripeResult<StripeInvoice> {
        let mut form = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let prefix = format!("lines[{index}]");
            form.push((format!("{prefix}[description]"), line.description.clone()));
            form.push((format!("{prefix}[amount]"), line.amount.to_string()));
            form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
            form.push((format!("{prefix}[period][start]"), line.period.start.to_string()));
            form.push((format!("{prefix}[period][end]"), line.period.end.to_string()));
            push_metadata(&mut form, &prefix, &line.metadata);
        }

        let wire: WireInvoice = self
            .send(
                self.client
                    .post(self.endpoint(&format!("invoices/{invoice_id}/add_lines")))
                    .form(&form),
                "invoice",
                invoice_id,
            )
            .await?;
        self.invoice_from_wire(wire).await
    }

    async fn update_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<UpdateInvoiceLine>,
    ) -> StripeResult<StripeInvoice> {
        let mut form = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let prefix = format!("lines[{index}]");
            form.push((format!("{prefix}[id]"), line.id.clone()));
            form.push((format!("{prefix}[description]"), line.description.clone()));
            form.push((format!("{prefix}[amount]"), line.amount.to_string()));
            form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
            push_metadata(&mut form, &prefix, &line.metadata);
        }

        let wire: WireInvoice = self
            .send(
                self.client
                    .post(self.endpoint(&format!("invoices/{invoice_id}/update_lines")))
                    .form(&form),
                "invoice",
                invoice_id,
            )
            .await?;
        self.invoice_from_wire(wire).await
    }

    async fn remove_invoice_lines(
        &self,
        invoice_id: &str,
        line_ids: Vec<String>,
    ) -> StripeResult<StripeInvoice> {
        let mut form = Vec::new();
        for (index, id) in line_ids.iter().enumerate() {
            form.push((format!("lines[{index}][id]"), id.clone()));
            form.push((format!("lines[{index}][behavior]"), "delete".to_string()));
        }

        let wire: WireInvoice = self
            .send(
                self.client
                    .post(self.endpoint(&format!("invoices/{invoice_id}/remove_lines")))
                    .form(&form),
                "invoice",
                invoice_id,
            )
            .await?;
        self.invoice_from_wire(wire).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    #[serde(default)]
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireList<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    id: String,
    #[serde(default)]
    default_currency: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireWebhookEndpoint {
    id: String,
    #[serde(default)]
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireInvoiceSettings {
    #[serde(default)]
    default_payment_method: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireCustomer {
    id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    invoice_settings: Option<WireInvoiceSettings>,
}

impl From<WireCustomer> for StripeCustomer {
    fn from(wire: WireCustomer) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            email: wire.email,
            default_payment_method_id: wire
                .invoice_settings
                .and_then(|settings| settings.default_payment_method)
                .as_ref()
                .and_then(expandable_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBillingDetails {
    #[serde(default)]
    address: Option<StripeAddress>,
}

#[derive(Debug, Deserialize)]
struct WirePaymentMethod {
    id: String,
    #[serde(default)]
    customer: Option<Value>,
    #[serde(default)]
    billing_details: Option<WireBillingDetails>,
}

#[derive(Debug, Deserialize)]
struct WireCheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    setup_intent: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireInvoiceLine {
    id: String,
    amount: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    period: Option<StripePeriod>,
}

impl From<WireInvoiceLine> for StripeInvoiceLine {
    fn from(wire: WireInvoiceLine) -> Self {
        Self {
            id: wire.id,
            amount: wire.amount,
            description: wire.description,
            metadata: wire.metadata,
            period: wire.period,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireInvoice {
    id: String,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    customer: Value,
    currency: String,
    #[serde(default)]
    payment_intent: Option<Value>,
    lines: WireList<WireInvoiceLine>,
}
