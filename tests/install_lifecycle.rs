mod common;

use app_marketplace::apps::{AppId, AppStatus, AppStore, CustomerId, InstallInput, InstallWithApiKeyInput};
use app_marketplace::marketplace::{AppType, CapabilityType};
use app_marketplace::pagination::Page;
use app_marketplace::secrets::{STRIPE_API_KEY_SECRET, STRIPE_WEBHOOK_SECRET};
use app_marketplace::stripe::testing::StripeCall;
use app_marketplace::stripe::StripeClient;
use common::{Harness, BASE_URL};

#[tokio::test]
async fn stripe_install_persists_app_and_secrets() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;

    assert_eq!(app.app_type, AppType::Stripe);
    assert_eq!(app.status, AppStatus::Ready);
    assert_eq!(app.id.namespace, "acme");

    let data = harness.store.get_stripe_app_data(&app.id).await.unwrap();
    assert!(data.livemode);
    assert_eq!(data.account_id, "acct_acme");
    assert_eq!(data.masked_api_key, "sk_live_****7890");
    assert_eq!(data.webhook_endpoint_id, "we_1");

    let calls = harness.stripe.calls().await;
    assert_eq!(calls[0], StripeCall::GetAccount);
    match &calls[1] {
        StripeCall::SetupWebhook(params) => {
            assert_eq!(
                params.url,
                format!("{BASE_URL}/api/v1/apps/{}/stripe/webhook", app.id.id)
            );
            assert!(params
                .event_types
                .contains(&"setup_intent.succeeded".to_string()));
        }
        other => panic!("unexpected call {other:?}"),
    }

    let secrets = harness.secrets.values_for(&app.id).await;
    assert_eq!(
        secrets,
        vec![
            (STRIPE_API_KEY_SECRET.to_string(), "sk_live_1234567890".to_string()),
            (STRIPE_WEBHOOK_SECRET.to_string(), "whsec_2".to_string()),
        ]
    );
    assert_eq!(harness.clients.keys(), vec!["sk_live_1234567890".to_string()]);
}

#[tokio::test]
async fn test_key_installs_in_test_mode() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_test_abcdef").await;
    let data = harness.store.get_stripe_app_data(&app.id).await.unwrap();
    assert!(!data.livemode);
}

#[tokio::test]
async fn rejects_unknown_key_prefix_without_provider_calls() {
    let harness = Harness::new();
    let err = harness
        .context
        .apps
        .install_with_api_key(
            AppType::Stripe,
            InstallWithApiKeyInput {
                namespace: "acme".into(),
                api_key: "pk_live_abc".into(),
                name: None,
                base_url: BASE_URL.into(),
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(harness.stripe.calls().await.is_empty());
    assert_eq!(harness.store.app_count().await, 0);
}

#[tokio::test]
async fn rejected_key_creates_nothing() {
    let harness = Harness::new();
    harness.stripe.set_unauthorized(true).await;

    let err = harness
        .context
        .apps
        .install_with_api_key(
            AppType::Stripe,
            InstallWithApiKeyInput {
                namespace: "acme".into(),
                api_key: "sk_live_revoked".into(),
                name: None,
                base_url: BASE_URL.into(),
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_provider_authentication());
    assert_eq!(harness.secrets.len().await, 0);
    assert_eq!(harness.store.app_count().await, 0);
}

#[tokio::test]
async fn uninstall_removes_webhook_and_app_but_keeps_secrets() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let customer = CustomerId::new("acme", "cust_1");
    harness.link_customer(&app.id, &customer, true).await;
    harness.stripe.clear_calls().await;

    harness.context.apps.uninstall(&app.id).await.unwrap();

    assert!(harness
        .stripe
        .calls()
        .await
        .contains(&StripeCall::DeleteWebhook("we_1".into())));
    assert!(harness.stripe.webhook_ids().await.is_empty());
    assert!(harness.context.apps.get_app(&app.id).await.unwrap_err().is_not_found());
    assert_eq!(harness.store.customer_row_count().await, 0);
    assert_eq!(harness.secrets.len().await, 2);
}

#[tokio::test]
async fn uninstall_tolerates_missing_webhook() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    harness.stripe.delete_webhook("we_1").await.unwrap();

    harness.context.apps.uninstall(&app.id).await.unwrap();
    assert_eq!(harness.store.app_count().await, 0);
}

#[tokio::test]
async fn uninstall_tolerates_revoked_key() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    harness.stripe.set_unauthorized(true).await;

    harness.context.apps.uninstall(&app.id).await.unwrap();
    assert_eq!(harness.store.app_count().await, 0);
}

#[tokio::test]
async fn uninstall_unknown_app_is_not_found() {
    let harness = Harness::new();
    let err = harness
        .context
        .apps
        .uninstall(&AppId::generate("acme"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn rejected_key_marks_app_unauthorized_once() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let customer = CustomerId::new("acme", "cust_1");
    harness.link_customer(&app.id, &customer, true).await;
    harness.stripe.set_unauthorized(true).await;

    let err = harness
        .context
        .apps
        .validate_customer(&app.id, &customer, &[CapabilityType::InvoiceCustomers])
        .await
        .unwrap_err();
    assert!(err.is_provider_authentication());
    let stored = harness.context.apps.get_app(&app.id).await.unwrap();
    assert_eq!(stored.status, AppStatus::Unauthorized);

    // Not ready: the provider is not called again.
    harness.stripe.clear_calls().await;
    let err = harness
        .context
        .apps
        .validate_customer(&app.id, &customer, &[CapabilityType::InvoiceCustomers])
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn customer_without_data_fails_for_every_capability() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let customer = CustomerId::new("acme", "cust_unlinked");
    harness.stripe.clear_calls().await;

    for capability in [
        CapabilityType::CalculateTax,
        CapabilityType::InvoiceCustomers,
        CapabilityType::CollectPayments,
    ] {
        let err = harness
            .context
            .apps
            .validate_customer(&app.id, &customer, &[capability])
            .await
            .unwrap_err();
        assert!(err.is_precondition(), "{capability}: {err}");
        assert!(err.to_string().contains("has no data"), "{err}");
    }
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn restoring_status_makes_app_usable_again() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let customer = CustomerId::new("acme", "cust_1");
    harness.link_customer(&app.id, &customer, true).await;
    harness
        .context
        .apps
        .update_app_status(&app.id, AppStatus::Unauthorized)
        .await
        .unwrap();

    let updated = harness
        .context
        .apps
        .update_app_status(&app.id, AppStatus::Ready)
        .await
        .unwrap();
    assert_eq!(updated.status, AppStatus::Ready);
    harness
        .context
        .apps
        .validate_customer(&app.id, &customer, &[CapabilityType::CollectPayments])
        .await
        .unwrap();
}

#[tokio::test]
async fn sandbox_rejects_api_key_install() {
    let harness = Harness::new();
    let err = harness
        .context
        .apps
        .install_with_api_key(
            AppType::Sandbox,
            InstallWithApiKeyInput {
                namespace: "acme".into(),
                api_key: "sk_live_1234567890".into(),
                name: None,
                base_url: BASE_URL.into(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn stripe_rejects_credential_less_install() {
    let harness = Harness::new();
    let err = harness
        .context
        .apps
        .install(
            AppType::Stripe,
            InstallInput {
                namespace: "acme".into(),
                name: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn apps_are_listed_per_namespace() {
    let harness = Harness::new();
    harness.install_stripe("acme", "sk_live_1234567890").await;
    harness
        .context
        .apps
        .install(
            AppType::Sandbox,
            InstallInput {
                namespace: "acme".into(),
                name: Some("Local".into()),
            },
        )
        .await
        .unwrap();
    harness.install_stripe("globex", "sk_test_0987654321").await;

    let acme = harness
        .context
        .apps
        .list_apps("acme", Page::default())
        .await
        .unwrap();
    assert_eq!(acme.total_count, 2);
    assert!(acme.items.iter().all(|app| app.id.namespace == "acme"));

    let globex = harness
        .context
        .apps
        .list_apps("globex", Page::default())
        .await
        .unwrap();
    assert_eq!(globex.total_count, 1);
}

#[tokio::test]
async fn apps_are_invisible_across_namespaces() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let foreign = AppId::new("globex", app.id.id);
    assert!(harness
        .context
        .apps
        .get_app(&foreign)
        .await
        .unwrap_err()
        .is_not_found());
}
