use std::collections::BTreeMap;
use std::sync::Arc;

use crate::apps::{ensure_same_namespace, AppBase, AppStatus, AppStore, CustomerData, CustomerId};
use crate::error::{AppError, AppResult, NotFoundKind, ResultExt};
use crate::marketplace::CapabilityType;
use crate::secrets::SecretStore;

use super::client::{StripeClient, StripeClientError, StripeClientFactory, StripeResult};
use super::models::{
    CreateCheckoutSessionParams, CreateCustomerParams, StripeAppData, StripeCheckoutSession,
    StripeCustomerData, METADATA_APP_ID, METADATA_CUSTOMER_ID, METADATA_NAMESPACE,
};

const CUSTOMER_ID_PREFIX: &str = "cus_";
const PAYMENT_METHOD_ID_PREFIX: &str = "pm_";

#[derive(Clone, Debug)]
pub struct CreateCheckoutSessionInput {
    pub customer_id: CustomerId,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub currency: Option<String>,
    pub success_url: String,
    pub cancel_url: Option<String>,
}

/// key: stripe-app -> installed stripe account
///
/// Provider calls resolve the API key from the secret store every time and
/// require the app to be `ready`.
pub struct StripeApp {
    pub(super) base: AppBase,
    pub(super) data: StripeAppData,
    pub(super) store: Arc<dyn AppStore>,
    secrets: Arc<dyn SecretStore>,
    clients: Arc<dyn StripeClientFactory>,
}

impl StripeApp {
    pub fn new(
        base: AppBase,
        data: StripeAppData,
        store: Arc<dyn AppStore>,
        secrets: Arc<dyn SecretStore>,
        clients: Arc<dyn StripeClientFactory>,
    ) -> Self {
        Self {
            base,
            data,
            store,
            secrets,
            clients,
        }
    }

    pub fn base(&self) -> &AppBase {
        &self.base
    }

    pub fn data(&self) -> &StripeAppData {
        &self.data
    }

    pub(super) async fn client(&self) -> AppResult<Arc<dyn StripeClient>> {
        if self.base.status != AppStatus::Ready {
            return Err(AppError::precondition(format!(
                "stripe app {} is not ready: {}",
                self.base.id,
                self.base.status.as_str()
            )));
        }
        let secret = self
            .secrets
            .get_secret(&self.data.api_key)
            .await
            .context("resolve stripe api key")?;
        self.clients.client(&secret.value)
    }

    /// Converts a provider failure. A rejected key marks the app unauthorized.
    pub(super) async fn provider_error(&self, err: StripeClientError) -> AppError {
        if err.is_authentication() {
            match self
                .store
                .update_app_status(&self.base.id, AppStatus::Ready, AppStatus::Unauthorized)
                .await
            {
                Ok(true) => tracing::warn!(
                    app_id = %self.base.id,
                    "stripe rejected the api key, app marked unauthorized"
                ),
                Ok(false) => {}
                Err(store_err) => tracing::error!(
                    app_id = %self.base.id,
                    error = ?store_err,
                    "failed to mark app unauthorized"
                ),
            }
        }
        err.into()
    }

    pub(super) async fn call<T>(&self, result: StripeResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.provider_error(err).await),
        }
    }

    pub(super) async fn find_customer_data(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Option<StripeCustomerData>> {
        match self.store.get_customer_data(&self.base.id, customer_id).await? {
            Some(CustomerData::Stripe(data)) => Ok(Some(data)),
            Some(other) => Err(AppError::Inconsistency(format!(
                "stripe app {} holds non stripe customer data {other:?}",
                self.base.id
            ))),
            None => Ok(None),
        }
    }

    pub(super) async fn require_customer_data(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<StripeCustomerData> {
        self.find_customer_data(customer_id).await?.ok_or_else(|| {
            AppError::precondition(format!(
                "customer {customer_id} has no data for stripe app {}",
                self.base.id
            ))
        })
    }

    pub async fn validate_customer(
        &self,
        customer_id: &CustomerId,
        capabilities: &[CapabilityType],
    ) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.base.listing.validate_capabilities(capabilities)?;
        let data = self.require_customer_data(customer_id).await?;

        if !capabilities
            .iter()
            .any(CapabilityType::requires_provider_customer)
        {
            return Ok(());
        }

        let client = self.client().await?;
        let customer = match client.get_customer(&data.external_customer_id).await {
            Ok(customer) => customer,
            Err(err) if err.is_not_found() => {
                return Err(AppError::precondition(format!(
                    "stripe customer {} not found",
                    data.external_customer_id
                )))
            }
            Err(err) => return Err(self.provider_error(err).await),
        };

        let payment_method_id = data
            .default_payment_method_id
            .clone()
            .or_else(|| customer.default_payment_method_id.clone())
            .ok_or_else(|| {
                AppError::precondition(format!(
                    "stripe customer {} has no default payment method",
                    customer.id
                ))
            })?;

        let payment_method = match client.get_payment_method(&payment_method_id).await {
            Ok(payment_method) => payment_method,
            Err(err) if err.is_not_found() => {
                return Err(AppError::precondition(format!(
                    "default payment method {payment_method_id} not found"
                )))
            }
            Err(err) => return Err(self.provider_error(err).await),
        };

        if payment_method.customer_id.as_deref() != Some(customer.id.as_str()) {
            return Err(AppError::precondition(format!(
                "payment method {payment_method_id} does not belong to stripe customer {}",
                customer.id
            )));
        }
        if payment_method.billing_address.is_none() {
            return Err(AppError::precondition(format!(
                "default payment method {payment_method_id} has no billing address"
            )));
        }
        Ok(())
    }

    pub async fn get_customer_data(&self, customer_id: &CustomerId) -> AppResult<StripeCustomerData> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.find_customer_data(customer_id)
            .await?
            .ok_or_else(|| AppError::not_found(NotFoundKind::CustomerData, customer_id))
    }

    /// Links a customer to an existing provider customer.
    pub async fn upsert_customer_data(
        &self,
        customer_id: &CustomerId,
        data: StripeCustomerData,
    ) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        if !data.external_customer_id.starts_with(CUSTOMER_ID_PREFIX) {
            return Err(AppError::validation(format!(
                "stripe customer id must start with {CUSTOMER_ID_PREFIX}: {}",
                data.external_customer_id
            )));
        }
        if let Some(payment_method_id) = &data.default_payment_method_id {
            if !payment_method_id.starts_with(PAYMENT_METHOD_ID_PREFIX) {
                return Err(AppError::validation(format!(
                    "stripe payment method id must start with {PAYMENT_METHOD_ID_PREFIX}: {payment_method_id}"
                )));
            }
        }

        let client = self.client().await?;
        match client.get_customer(&data.external_customer_id).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                return Err(AppError::validation(format!(
                    "stripe customer {} does not exist",
                    data.external_customer_id
                )))
            }
            Err(err) => return Err(self.provider_error(err).await),
        }

        self.store
            .upsert_customer_data(&self.base.id, customer_id, &CustomerData::Stripe(data))
            .await
    }

    pub async fn delete_customer_data(&self, customer_id: &CustomerId) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        self.store
            .delete_customer_data(&self.base.id, customer_id)
            .await
    }

    /// Opens a setup mode checkout session, creating the provider customer on
    /// first use.
    pub async fn create_checkout_session(
        &self,
        input: CreateCheckoutSessionInput,
    ) -> AppResult<StripeCheckoutSession> {
        let customer_id = &input.customer_id;
        ensure_same_namespace(&self.base.id, customer_id)?;
        customer_id.validate()?;
        self.base
            .listing
            .validate_capabilities(&[CapabilityType::CollectPayments])?;
        if input.success_url.trim().is_empty() {
            return Err(AppError::validation("success url is required"));
        }

        let client = self.client().await?;
        let external_customer_id = match self.find_customer_data(customer_id).await? {
            Some(data) => data.external_customer_id,
            None => {
                let metadata = BTreeMap::from([
                    (METADATA_NAMESPACE.to_string(), customer_id.namespace.clone()),
                    (METADATA_CUSTOMER_ID.to_string(), customer_id.id.clone()),
                ]);
                let created = self
                    .call(
                        client
                            .create_customer(CreateCustomerParams {
                                name: input.customer_name.clone(),
                                email: input.customer_email.clone(),
                                metadata,
                            })
                            .await,
                    )
                    .await?;
                self.store
                    .upsert_customer_data(
                        &self.base.id,
                        customer_id,
                        &CustomerData::Stripe(StripeCustomerData {
                            external_customer_id: created.id.clone(),
                            default_payment_method_id: None,
                        }),
                    )
                    .await?;
                tracing::info!(
                    app_id = %self.base.id,
                    customer_id = %customer_id,
                    stripe_customer_id = %created.id,
                    "created stripe customer"
                );
                created.id
            }
        };

        let setup_intent_metadata = BTreeMap::from([
            (METADATA_NAMESPACE.to_string(), self.base.id.namespace.clone()),
            (METADATA_APP_ID.to_string(), self.base.id.id.to_string()),
            (METADATA_CUSTOMER_ID.to_string(), customer_id.id.clone()),
        ]);
        self.call(
            client
                .create_checkout_session(CreateCheckoutSessionParams {
                    customer_id: external_customer_id,
                    currency: input.currency,
                    success_url: input.success_url,
                    cancel_url: input.cancel_url,
                    setup_intent_metadata,
                })
                .await,
        )
        .await
    }

    /// Applies a completed payment setup: the payment method becomes the
    /// customer's invoice default on the provider and locally.
    pub async fn update_default_payment_method(
        &self,
        customer_id: &CustomerId,
        external_customer_id: &str,
        payment_method_id: &str,
    ) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, customer_id)?;
        if let Some(stored) = self.find_customer_data(customer_id).await? {
            if stored.external_customer_id != external_customer_id {
                return Err(AppError::precondition(format!(
                    "customer {customer_id} is linked to stripe customer {}, not {external_customer_id}",
                    stored.external_customer_id
                )));
            }
        }

        let client = self.client().await?;
        self.call(
            client
                .update_customer_default_payment_method(external_customer_id, payment_method_id)
                .await,
        )
        .await?;

        self.store
            .upsert_customer_data(
                &self.base.id,
                customer_id,
                &CustomerData::Stripe(StripeCustomerData {
                    external_customer_id: external_customer_id.to_string(),
                    default_payment_method_id: Some(payment_method_id.to_string()),
                }),
            )
            .await?;
        tracing::info!(
            app_id = %self.base.id,
            customer_id = %customer_id,
            payment_method_id,
            "default payment method updated"
        );
        Ok(())
    }
}
