//! Recording Stripe double for install, sync and webhook tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppResult;

use super::client::{StripeClient, StripeClientError, StripeClientFactory, StripeResult};
use super::models::{
    AddInvoiceLine, CreateCheckoutSessionParams, CreateCustomerParams, CreateInvoiceParams,
    SetupWebhookParams, StripeAccount, StripeCheckoutSession, StripeCustomer, StripeInvoice,
    StripeInvoiceLine, StripePaymentMethod, StripeWebhookEndpoint, UpdateInvoiceLine,
    UpdateInvoiceParams,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StripeCall {
    GetAccount,
    SetupWebhook(SetupWebhookParams),
    DeleteWebhook(String),
    GetCustomer(String),
    CreateCustomer(CreateCustomerParams),
    UpdateCustomerDefaultPaymentMethod {
        customer_id: String,
        payment_method_id: String,
    },
    GetPaymentMethod(String),
    CreateCheckoutSession(CreateCheckoutSessionParams),
    CreateInvoice(CreateInvoiceParams),
    ListInvoiceLines(String),
    UpdateInvoice(UpdateInvoiceParams),
    DeleteInvoice(String),
    FinalizeInvoice(String),
    AddInvoiceLines {
        invoice_id: String,
        lines: Vec<AddInvoiceLine>,
    },
    UpdateInvoiceLines {
        invoice_id: String,
        lines: Vec<UpdateInvoiceLine>,
    },
    RemoveInvoiceLines {
        invoice_id: String,
        line_ids: Vec<String>,
    },
}

struct State {
    account: StripeAccount,
    customers: HashMap<String, StripeCustomer>,
    payment_methods: HashMap<String, StripePaymentMethod>,
    invoices: HashMap<String, StripeInvoice>,
    /// First response per idempotency key, replayed verbatim.
    idempotency: HashMap<String, StripeInvoice>,
    webhooks: HashMap<String, StripeWebhookEndpoint>,
    sequence: u64,
    unauthorized: bool,
    strip_line_metadata: bool,
    lose_add_lines_response: bool,
    calls: Vec<StripeCall>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_{}", self.sequence)
    }

    fn begin(&mut self, call: StripeCall) -> StripeResult<()> {
        self.calls.push(call);
        if self.unauthorized {
            return Err(StripeClientError::Authentication(
                "Invalid API Key provided".into(),
            ));
        }
        Ok(())
    }

    fn invoice_mut(&mut self, invoice_id: &str) -> StripeResult<&mut StripeInvoice> {
        self.invoices
            .get_mut(invoice_id)
            .ok_or_else(|| not_found("invoice", invoice_id))
    }
}

fn not_found(resource: &'static str, id: &str) -> StripeClientError {
    StripeClientError::NotFound {
        resource,
        id: id.to_string(),
    }
}

/// Shared handle; clones observe the same state.
#[derive(Clone)]
pub struct FakeStripeClient {
    state: Arc<Mutex<State>>,
}

impl Default for FakeStripeClient {
    fn default() -> Self {
        Self::new("acct_test")
    }
}

impl FakeStripeClient {
    pub fn new(account_id: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                account: StripeAccount {
                    id: account_id.to_string(),
                    default_currency: Some("usd".into()),
                    country: Some("US".into()),
                },
                customers: HashMap::new(),
                payment_methods: HashMap::new(),
                invoices: HashMap::new(),
                idempotency: HashMap::new(),
                webhooks: HashMap::new(),
                sequence: 0,
                unauthorized: false,
                strip_line_metadata: false,
                lose_add_lines_response: false,
                calls: Vec::new(),
            })),
        }
    }

    pub async fn calls(&self) -> Vec<StripeCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Every following call fails with a 401.
    pub async fn set_unauthorized(&self, unauthorized: bool) {
        self.state.lock().await.unauthorized = unauthorized;
    }

    /// Returned line items lose their metadata, forcing positional matching.
    pub async fn set_strip_line_metadata(&self, strip: bool) {
        self.state.lock().await.strip_line_metadata = strip;
    }

    /// The next line batch is applied but the caller only sees a failure.
    pub async fn lose_next_add_lines_response(&self) {
        self.state.lock().await.lose_add_lines_response = true;
    }

    pub async fn insert_customer(&self, customer: StripeCustomer) {
        self.state
            .lock()
            .await
            .customers
            .insert(customer.id.clone(), customer);
    }

    pub async fn insert_payment_method(&self, payment_method: StripePaymentMethod) {
        self.state
            .lock()
            .await
            .payment_methods
            .insert(payment_method.id.clone(), payment_method);
    }

    pub async fn insert_invoice(&self, invoice: StripeInvoice) {
        self.state
            .lock()
            .await
            .invoices
            .insert(invoice.id.clone(), invoice);
    }

    pub async fn invoice(&self, invoice_id: &str) -> Option<StripeInvoice> {
        self.state.lock().await.invoices.get(invoice_id).cloned()
    }

    pub async fn customer(&self, customer_id: &str) -> Option<StripeCustomer> {
        self.state.lock().await.customers.get(customer_id).cloned()
    }

    pub async fn webhook_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.webhooks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.lock().await.invoices.len()
    }
}

#[async_trait]
impl StripeClient for FakeStripeClient {
    async fn get_account(&self) -> StripeResult<StripeAccount> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::GetAccount)?;
        Ok(state.account.clone())
    }

    async fn setup_webhook(&self, params: SetupWebhookParams) -> StripeResult<StripeWebhookEndpoint> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::SetupWebhook(params))?;
        let endpoint = StripeWebhookEndpoint {
            id: state.next_id("we"),
            secret: state.next_id("whsec"),
        };
        state.webhooks.insert(endpoint.id.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn delete_webhook(&self, endpoint_id: &str) -> StripeResult<()> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::DeleteWebhook(endpoint_id.to_string()))?;
        state
            .webhooks
            .remove(endpoint_id)
            .map(|_| ())
            .ok_or_else(|| not_found("webhook_endpoint", endpoint_id))
    }

    async fn get_customer(&self, customer_id: &str) -> StripeResult<StripeCustomer> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::GetCustomer(customer_id.to_string()))?;
        state
            .customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| not_found("customer", customer_id))
    }

    async fn create_customer(&self, params: CreateCustomerParams) -> StripeResult<StripeCustomer> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::CreateCustomer(params.clone()))?;
        let customer = StripeCustomer {
            id: state.next_id("cus"),
            name: params.name,
            email: params.email,
            default_payment_method_id: None,
        };
        state
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn update_customer_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> StripeResult<StripeCustomer> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::UpdateCustomerDefaultPaymentMethod {
            customer_id: customer_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
        })?;
        let customer = state
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| not_found("customer", customer_id))?;
        customer.default_payment_method_id = Some(payment_method_id.to_string());
        Ok(customer.clone())
    }

    async fn get_payment_method(
        &self,
        payment_method_id: &str,
    ) -> StripeResult<StripePaymentMethod> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::GetPaymentMethod(payment_method_id.to_string()))?;
        state
            .payment_methods
            .get(payment_method_id)
            .cloned()
            .ok_or_else(|| not_found("payment_method", payment_method_id))
    }

    async fn create_checkout_session(
        &self,
        params: CreateCheckoutSessionParams,
    ) -> StripeResult<StripeCheckoutSession> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::CreateCheckoutSession(params.clone()))?;
        let id = state.next_id("cs");
        Ok(StripeCheckoutSession {
            url: Some(format!("https://checkout.stripe.test/{id}")),
            id,
            setup_intent_id: Some(state.next_id("seti")),
            customer_id: params.customer_id,
        })
    }

    async fn create_invoice(&self, params: CreateInvoiceParams) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::CreateInvoice(params.clone()))?;
        if let Some(first) = state.idempotency.get(&params.idempotency_key) {
            return Ok(StripeInvoice {
                replayed: true,
                ..first.clone()
            });
        }
        if !state.customers.contains_key(&params.customer_id) {
            return Err(not_found("customer", &params.customer_id));
        }

        let invoice = StripeInvoice {
            id: state.next_id("in"),
            number: None,
            status: Some("draft".into()),
            customer_id: params.customer_id,
            currency: params.currency.to_ascii_lowercase(),
            payment_intent_id: None,
            lines: Vec::new(),
            replayed: false,
        };
        state
            .idempotency
            .insert(params.idempotency_key, invoice.clone());
        state.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(invoice)
    }

    async fn list_invoice_lines(&self, invoice_id: &str) -> StripeResult<Vec<StripeInvoiceLine>> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::ListInvoiceLines(invoice_id.to_string()))?;
        Ok(state.invoice_mut(invoice_id)?.lines.clone())
    }

    async fn update_invoice(&self, params: UpdateInvoiceParams) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::UpdateInvoice(params.clone()))?;
        Ok(state.invoice_mut(&params.invoice_id)?.clone())
    }

    async fn delete_invoice(&self, invoice_id: &str) -> StripeResult<()> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::DeleteInvoice(invoice_id.to_string()))?;
        state
            .invoices
            .remove(invoice_id)
            .map(|_| ())
            .ok_or_else(|| not_found("invoice", invoice_id))
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::FinalizeInvoice(invoice_id.to_string()))?;
        let sequence = state.sequence + 1;
        state.sequence = sequence;
        let invoice = state.invoice_mut(invoice_id)?;
        invoice.status = Some("open".into());
        invoice.number = Some(format!("TEST-{sequence:04}"));
        invoice.payment_intent_id = Some(format!("pi_{sequence}"));
        Ok(invoice.clone())
    }

    async fn add_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<AddInvoiceLine>,
    ) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::AddInvoiceLines {
            invoice_id: invoice_id.to_string(),
            lines: lines.clone(),
        })?;
        state.invoice_mut(invoice_id)?;
        let strip = state.strip_line_metadata;
        let mut created = Vec::with_capacity(lines.len());
        for line in lines {
            created.push(StripeInvoiceLine {
                id: state.next_id("il"),
                amount: line.amount,
                description: Some(line.description),
                metadata: if strip { Default::default() } else { line.metadata },
                period: Some(line.period),
            });
        }
        let invoice = state.invoice_mut(invoice_id)?;
        invoice.lines.extend(created);
        let invoice = invoice.clone();
        if std::mem::take(&mut state.lose_add_lines_response) {
            return Err(StripeClientError::Api {
                status: 502,
                code: None,
                message: "connection reset before response".into(),
            });
        }
        Ok(invoice)
    }

    async fn update_invoice_lines(
        &self,
        invoice_id: &str,
        lines: Vec<UpdateInvoiceLine>,
    ) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::UpdateInvoiceLines {
            invoice_id: invoice_id.to_string(),
            lines: lines.clone(),
        })?;
        let strip = state.strip_line_metadata;
        let invoice = state.invoice_mut(invoice_id)?;
        for update in lines {
            let line = invoice
                .lines
                .iter_mut()
                .find(|line| line.id == update.id)
                .ok_or_else(|| not_found("invoice_line", &update.id))?;
            line.amount = update.amount;
            line.description = Some(update.description);
            if !strip {
                line.metadata = update.metadata;
            }
        }
        Ok(invoice.clone())
    }

    async fn remove_invoice_lines(
        &self,
        invoice_id: &str,
        line_ids: Vec<String>,
    ) -> StripeResult<StripeInvoice> {
        let mut state = self.state.lock().await;
        state.begin(StripeCall::RemoveInvoiceLines {
            invoice_id: invoice_id.to_string(),
            line_ids: line_ids.clone(),
        })?;
        let invoice = state.invoice_mut(invoice_id)?;
        invoice.lines.retain(|line| !line_ids.contains(&line.id));
        Ok(invoice.clone())
    }
}

/// Hands out the same [`FakeStripeClient`] for every key and remembers the keys.
#[derive(Clone, Default)]
pub struct FakeStripeClientFactory {
    client: FakeStripeClient,
    keys: Arc<std::sync::Mutex<Vec<String>>>,
}

impl FakeStripeClientFactory {
    pub fn new(client: FakeStripeClient) -> Self {
        Self {
            client,
            keys: Arc::default(),
        }
    }

    pub fn client_handle(&self) -> FakeStripeClient {
        self.client.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }
}

impl StripeClientFactory for FakeStripeClientFactory {
    fn client(&self, api_key: &str) -> AppResult<Arc<dyn StripeClient>> {
        if let Ok(mut keys) = self.keys.lock() {
            keys.push(api_key.to_string());
        }
        Ok(Arc::new(self.client.clone()))
    }
}
