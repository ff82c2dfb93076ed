//! Stripe app: install flow, customer gate, invoice sync and webhooks.

pub mod app;
pub mod client;
pub mod factory;
pub mod invoice_sync;
pub mod models;
pub mod testing;
pub mod webhook;

pub use app::{CreateCheckoutSessionInput, StripeApp};
pub use client::{
    HttpStripeClient, HttpStripeClientFactory, StripeClient, StripeClientError,
    StripeClientFactory,
};
pub use factory::{listing, StripeAppFactory};
pub use webhook::{WebhookDispatcher, WebhookOutcome};
