#![allow(dead_code)]

use std::sync::Arc;

use app_marketplace::apps::testing::InMemoryAppStore;
use app_marketplace::apps::{AppBase, AppId, AppStore, CustomerData, CustomerId, InstallWithApiKeyInput};
use app_marketplace::billing::{ExternalIds, Invoice, InvoiceLine, LineKind, Period};
use app_marketplace::marketplace::AppType;
use app_marketplace::secrets::testing::InMemorySecretStore;
use app_marketplace::secrets::{SecretStore, STRIPE_WEBHOOK_SECRET};
use app_marketplace::stripe::models::{
    StripeAddress, StripeCustomer, StripeCustomerData, StripePaymentMethod,
};
use app_marketplace::stripe::testing::{FakeStripeClient, FakeStripeClientFactory};
use app_marketplace::stripe::StripeClientFactory;
use app_marketplace::AppContext;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

pub const BASE_URL: &str = "https://billing.example.com";

pub struct Harness {
    pub store: Arc<InMemoryAppStore>,
    pub secrets: Arc<InMemorySecretStore>,
    pub stripe: FakeStripeClient,
    pub clients: FakeStripeClientFactory,
    pub context: AppContext,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryAppStore::default());
        let secrets = Arc::new(InMemorySecretStore::default());
        let stripe = FakeStripeClient::new("acct_acme");
        let clients = FakeStripeClientFactory::new(stripe.clone());
        let context = AppContext::new(
            store.clone() as Arc<dyn AppStore>,
            secrets.clone() as Arc<dyn SecretStore>,
            Arc::new(clients.clone()) as Arc<dyn StripeClientFactory>,
            300,
        )
        .unwrap();
        Self {
            store,
            secrets,
            stripe,
            clients,
            context,
        }
    }

    pub async fn install_stripe(&self, namespace: &str, api_key: &str) -> AppBase {
        self.context
            .apps
            .install_with_api_key(
                AppType::Stripe,
                InstallWithApiKeyInput {
                    namespace: namespace.into(),
                    api_key: api_key.into(),
                    name: None,
                    base_url: BASE_URL.into(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn webhook_secret(&self, app_id: &AppId) -> String {
        self.secrets
            .values_for(app_id)
            .await
            .into_iter()
            .find(|(key, _)| key == STRIPE_WEBHOOK_SECRET)
            .map(|(_, value)| value)
            .unwrap()
    }

    /// Seeds a provider customer with a payment method and links it to `customer`.
    pub async fn link_customer(
        &self,
        app_id: &AppId,
        customer: &CustomerId,
        billing_address: bool,
    ) -> String {
        let stripe_customer_id = format!("cus_{}", customer.id);
        let payment_method_id = format!("pm_{}", customer.id);
        self.stripe
            .insert_customer(StripeCustomer {
                id: stripe_customer_id.clone(),
                name: None,
                email: None,
                default_payment_method_id: Some(payment_method_id.clone()),
            })
            .await;
        self.stripe
            .insert_payment_method(StripePaymentMethod {
                id: payment_method_id,
                customer_id: Some(stripe_customer_id.clone()),
                billing_address: billing_address.then(|| StripeAddress {
                    country: Some("US".into()),
                    postal_code: Some("94107".into()),
                    ..StripeAddress::default()
                }),
            })
            .await;
        self.context
            .apps
            .upsert_customer_data(
                app_id,
                customer,
                CustomerData::Stripe(StripeCustomerData {
                    external_customer_id: stripe_customer_id.clone(),
                    default_payment_method_id: None,
                }),
            )
            .await
            .unwrap();
        stripe_customer_id
    }
}

pub fn period() -> Period {
    Period {
        start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
    }
}

pub fn line(id: &str, cents: i64) -> InvoiceLine {
    InvoiceLine {
        id: id.into(),
        name: format!("Line {id}"),
        description: None,
        kind: LineKind::Fee,
        period: period(),
        quantity: Decimal::ONE,
        amount: Decimal::new(cents, 2),
        discounts: Vec::new(),
        children: Vec::new(),
        external_ids: ExternalIds::default(),
        deleted_at: None,
    }
}

pub fn synced_line(id: &str, cents: i64, external_id: &str) -> InvoiceLine {
    let mut line = line(id, cents);
    line.external_ids.invoicing = Some(external_id.into());
    line
}

pub fn invoice(namespace: &str, customer_id: &str, lines: Vec<InvoiceLine>) -> Invoice {
    Invoice {
        id: "inv_2024_03".into(),
        namespace: namespace.into(),
        customer_id: customer_id.into(),
        number: None,
        currency: "USD".into(),
        due_at: None,
        lines,
        external_ids: ExternalIds::default(),
    }
}
