mod common;

use app_marketplace::apps::{AppBase, AppStatus, CustomerId, InstallInput};
use app_marketplace::billing::{ExternalIds, Invoice, LineDiscount, SyncResult};
use app_marketplace::marketplace::AppType;
use app_marketplace::stripe::models::{
    StripeAddress, StripePaymentMethod, METADATA_LINE_ID, METADATA_LINE_TYPE,
};
use app_marketplace::stripe::testing::StripeCall;
use common::{invoice, line, period, synced_line, Harness};
use rust_decimal::Decimal;

const CUSTOMER: &str = "cust_1";

async fn linked_stripe_app(harness: &Harness) -> AppBase {
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    harness
        .link_customer(&app.id, &CustomerId::new("acme", CUSTOMER), true)
        .await;
    harness.stripe.clear_calls().await;
    app
}

fn with_external_id(mut invoice: Invoice, result: &SyncResult) -> Invoice {
    invoice.external_ids = ExternalIds {
        invoicing: Some(result.external_invoice_id.clone()),
        payment: None,
    };
    invoice
}

#[tokio::test]
async fn first_sync_creates_invoice_and_adds_lines_in_one_batch() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let invoice = invoice(
        "acme",
        CUSTOMER,
        vec![line("a", 1000), line("b", 2550), line("c", 99)],
    );

    let result = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();

    let calls = harness.stripe.calls().await;
    assert_eq!(calls.len(), 2, "{calls:?}");
    match &calls[0] {
        StripeCall::CreateInvoice(params) => {
            assert_eq!(params.customer_id, "cus_cust_1");
            assert_eq!(params.currency, "usd");
        }
        other => panic!("unexpected call {other:?}"),
    }
    match &calls[1] {
        StripeCall::AddInvoiceLines { invoice_id, lines } => {
            assert_eq!(invoice_id, &result.external_invoice_id);
            let amounts: Vec<i64> = lines.iter().map(|l| l.amount).collect();
            assert_eq!(amounts, vec![1000, 2550, 99]);
            assert!(lines.iter().all(|l| l.quantity == 1));
        }
        other => panic!("unexpected call {other:?}"),
    }

    assert_eq!(result.line_external_ids.len(), 3);
    let stripe_invoice = harness
        .stripe
        .invoice(&result.external_invoice_id)
        .await
        .unwrap();
    assert_eq!(stripe_invoice.lines.len(), 3);
    for stripe_line in &stripe_invoice.lines {
        let internal = &stripe_line.metadata[METADATA_LINE_ID];
        assert_eq!(result.line_external_ids[internal], stripe_line.id);
    }
}

#[tokio::test]
async fn retried_create_reuses_the_provider_invoice() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let invoice = invoice("acme", CUSTOMER, vec![line("a", 1000), line("b", 2000)]);

    let first = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();
    // The caller never persisted the result; the same invoice is synced again.
    let second = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();

    assert_eq!(first.external_invoice_id, second.external_invoice_id);
    assert_eq!(first.line_external_ids, second.line_external_ids);
    assert_eq!(harness.stripe.invoice_count().await, 1);
    let stripe_invoice = harness
        .stripe
        .invoice(&first.external_invoice_id)
        .await
        .unwrap();
    assert_eq!(stripe_invoice.lines.len(), 2);

    let keys: Vec<String> = harness
        .stripe
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            StripeCall::CreateInvoice(params) => Some(params.idempotency_key),
            _ => None,
        })
        .collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1]);
    assert!(harness
        .stripe
        .calls()
        .await
        .contains(&StripeCall::ListInvoiceLines(first.external_invoice_id.clone())));
}

#[tokio::test]
async fn retry_after_lost_add_lines_response_adds_nothing_twice() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let invoice = invoice("acme", CUSTOMER, vec![line("a", 1000), line("b", 2000)]);

    harness.stripe.lose_next_add_lines_response().await;
    let err = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap_err();
    assert!(err.is_provider(), "{err}");
    harness.stripe.clear_calls().await;

    // The replayed create response has no lines; the retry must see the live ones.
    let result = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();

    assert_eq!(harness.stripe.invoice_count().await, 1);
    let stripe_invoice = harness
        .stripe
        .invoice(&result.external_invoice_id)
        .await
        .unwrap();
    assert_eq!(stripe_invoice.lines.len(), 2);
    assert_eq!(result.line_external_ids["a"], stripe_invoice.lines[0].id);
    assert_eq!(result.line_external_ids["b"], stripe_invoice.lines[1].id);

    let calls = harness.stripe.calls().await;
    assert!(!calls
        .iter()
        .any(|call| matches!(call, StripeCall::AddInvoiceLines { .. })));
    assert!(calls
        .iter()
        .any(|call| matches!(call, StripeCall::UpdateInvoiceLines { .. })));
}

#[tokio::test]
async fn resync_applies_add_update_remove_in_order() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let original = invoice(
        "acme",
        CUSTOMER,
        vec![line("a", 1000), line("b", 2000), line("c", 3000)],
    );
    let first = harness
        .context
        .apps
        .upsert_invoice(&app.id, &original)
        .await
        .unwrap();
    let il_a = first.line_external_ids["a"].clone();
    let il_b = first.line_external_ids["b"].clone();
    let il_c = first.line_external_ids["c"].clone();
    harness.stripe.clear_calls().await;

    let changed = with_external_id(
        invoice(
            "acme",
            CUSTOMER,
            vec![synced_line("a", 1500, &il_a), line("d", 4000)],
        ),
        &first,
    );
    let second = harness
        .context
        .apps
        .upsert_invoice(&app.id, &changed)
        .await
        .unwrap();

    let calls = harness.stripe.calls().await;
    assert_eq!(calls.len(), 4, "{calls:?}");
    assert!(matches!(calls[0], StripeCall::UpdateInvoice(_)));
    match &calls[1] {
        StripeCall::AddInvoiceLines { lines, .. } => {
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].amount, 4000);
        }
        other => panic!("unexpected call {other:?}"),
    }
    match &calls[2] {
        StripeCall::UpdateInvoiceLines { lines, .. } => {
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].id, il_a);
            assert_eq!(lines[0].amount, 1500);
        }
        other => panic!("unexpected call {other:?}"),
    }
    match &calls[3] {
        StripeCall::RemoveInvoiceLines { line_ids, .. } => {
            assert_eq!(line_ids, &vec![il_b, il_c]);
        }
        other => panic!("unexpected call {other:?}"),
    }

    assert_eq!(second.external_invoice_id, first.external_invoice_id);
    assert_eq!(second.line_external_ids["a"], il_a);
    assert!(second.line_external_ids.contains_key("d"));
    assert_eq!(second.line_external_ids.len(), 2);

    let stripe_invoice = harness
        .stripe
        .invoice(&first.external_invoice_id)
        .await
        .unwrap();
    let amounts: Vec<i64> = stripe_invoice.lines.iter().map(|l| l.amount).collect();
    assert_eq!(amounts, vec![1500, 4000]);
}

#[tokio::test]
async fn unchanged_resync_only_updates() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let original = invoice("acme", CUSTOMER, vec![line("a", 1000)]);
    let first = harness
        .context
        .apps
        .upsert_invoice(&app.id, &original)
        .await
        .unwrap();
    harness.stripe.clear_calls().await;

    let synced = with_external_id(
        invoice(
            "acme",
            CUSTOMER,
            vec![synced_line("a", 1000, &first.line_external_ids["a"])],
        ),
        &first,
    );
    harness
        .context
        .apps
        .upsert_invoice(&app.id, &synced)
        .await
        .unwrap();

    let calls = harness.stripe.calls().await;
    assert!(calls
        .iter()
        .all(|call| !matches!(call, StripeCall::AddInvoiceLines { .. } | StripeCall::RemoveInvoiceLines { .. })));
}

#[tokio::test]
async fn discounts_become_negative_items_for_the_same_period() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let mut discounted = line("a", 1000);
    discounted.discounts.push(LineDiscount {
        id: "disc_a".into(),
        description: Some("Launch promo".into()),
        amount: Decimal::new(250, 2),
        external_ids: ExternalIds::default(),
        deleted_at: None,
    });
    let invoice = invoice("acme", CUSTOMER, vec![discounted]);

    let result = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();

    let added = harness
        .stripe
        .calls()
        .await
        .into_iter()
        .find_map(|call| match call {
            StripeCall::AddInvoiceLines { lines, .. } => Some(lines),
            _ => None,
        })
        .unwrap();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].amount, 1000);
    assert_eq!(added[1].amount, -250);
    assert_eq!(added[1].description, "Launch promo");
    assert_eq!(added[0].period, added[1].period);
    assert_eq!(added[1].period.start, period().start.timestamp());
    assert_eq!(
        added[1].metadata.get(METADATA_LINE_TYPE).map(String::as_str),
        Some("discount")
    );

    assert_eq!(result.line_external_ids.len(), 1);
    assert_eq!(result.discount_external_ids.len(), 1);
    assert_ne!(
        result.line_external_ids["a"],
        result.discount_external_ids["disc_a"]
    );
}

#[tokio::test]
async fn grouped_lines_sync_only_their_leaves() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let mut group = line("group", 0);
    group.children = vec![line("child_1", 500), line("child_2", 700)];
    let invoice = invoice("acme", CUSTOMER, vec![group, line("flat", 100)]);

    let result = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice)
        .await
        .unwrap();

    let mut synced: Vec<&str> = result.line_external_ids.keys().map(String::as_str).collect();
    synced.sort();
    assert_eq!(synced, vec!["child_1", "child_2", "flat"]);
}

#[tokio::test]
async fn positional_matching_when_provider_drops_metadata() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    harness.stripe.set_strip_line_metadata(true).await;

    let first = harness
        .context
        .apps
        .upsert_invoice(
            &app.id,
            &invoice("acme", CUSTOMER, vec![line("a", 1000), line("b", 2000)]),
        )
        .await
        .unwrap();
    let stripe_invoice = harness
        .stripe
        .invoice(&first.external_invoice_id)
        .await
        .unwrap();
    assert_eq!(first.line_external_ids["a"], stripe_invoice.lines[0].id);
    assert_eq!(first.line_external_ids["b"], stripe_invoice.lines[1].id);

    let changed = with_external_id(
        invoice(
            "acme",
            CUSTOMER,
            vec![
                synced_line("a", 1000, &first.line_external_ids["a"]),
                synced_line("b", 2000, &first.line_external_ids["b"]),
                line("c", 3000),
            ],
        ),
        &first,
    );
    let second = harness
        .context
        .apps
        .upsert_invoice(&app.id, &changed)
        .await
        .unwrap();
    let stripe_invoice = harness
        .stripe
        .invoice(&first.external_invoice_id)
        .await
        .unwrap();
    assert_eq!(second.line_external_ids["c"], stripe_invoice.lines[2].id);
}

#[tokio::test]
async fn validate_invoice_requires_linked_customer() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    let err = harness
        .context
        .apps
        .validate_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("has no data"), "{err}");
}

#[tokio::test]
async fn validate_invoice_requires_billing_address() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    harness
        .link_customer(&app.id, &CustomerId::new("acme", CUSTOMER), false)
        .await;

    let err = harness
        .context
        .apps
        .validate_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("has no billing address"), "{err}");
}

#[tokio::test]
async fn validate_invoice_rejects_foreign_payment_method() {
    let harness = Harness::new();
    let app = harness.install_stripe("acme", "sk_live_1234567890").await;
    harness
        .link_customer(&app.id, &CustomerId::new("acme", CUSTOMER), true)
        .await;
    harness
        .stripe
        .insert_payment_method(StripePaymentMethod {
            id: "pm_cust_1".into(),
            customer_id: Some("cus_someone_else".into()),
            billing_address: Some(StripeAddress {
                country: Some("US".into()),
                ..StripeAddress::default()
            }),
        })
        .await;

    let err = harness
        .context
        .apps
        .validate_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("does not belong"), "{err}");
}

#[tokio::test]
async fn validate_invoice_passes_for_ready_customer() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    harness
        .context
        .apps
        .validate_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn invoice_from_other_namespace_is_rejected() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let err = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice("globex", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn finalize_returns_number_and_payment_id() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let draft = invoice("acme", CUSTOMER, vec![line("a", 1000)]);
    let synced = harness
        .context
        .apps
        .upsert_invoice(&app.id, &draft)
        .await
        .unwrap();

    let finalized = harness
        .context
        .apps
        .finalize_invoice(&app.id, &with_external_id(draft, &synced))
        .await
        .unwrap();
    assert!(finalized.invoice_number.unwrap().starts_with("TEST-"));
    assert!(finalized.payment_external_id.unwrap().starts_with("pi_"));
}

#[tokio::test]
async fn finalize_requires_synced_invoice() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let err = harness
        .context
        .apps
        .finalize_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn delete_without_external_id_is_a_no_op() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    harness
        .context
        .apps
        .delete_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap();
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn delete_removes_provider_invoice() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    let draft = invoice("acme", CUSTOMER, vec![line("a", 1000)]);
    let synced = harness
        .context
        .apps
        .upsert_invoice(&app.id, &draft)
        .await
        .unwrap();

    harness
        .context
        .apps
        .delete_invoice(&app.id, &with_external_id(draft, &synced))
        .await
        .unwrap();
    assert_eq!(harness.stripe.invoice_count().await, 0);
}

#[tokio::test]
async fn unauthorized_app_refuses_to_sync() {
    let harness = Harness::new();
    let app = linked_stripe_app(&harness).await;
    harness
        .context
        .apps
        .update_app_status(&app.id, AppStatus::Unauthorized)
        .await
        .unwrap();

    let err = harness
        .context
        .apps
        .upsert_invoice(&app.id, &invoice("acme", CUSTOMER, vec![line("a", 1000)]))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(harness.stripe.calls().await.is_empty());
}

#[tokio::test]
async fn sandbox_mints_and_keeps_ids() {
    let harness = Harness::new();
    let app = harness
        .context
        .apps
        .install(
            AppType::Sandbox,
            InstallInput {
                namespace: "acme".into(),
                name: None,
            },
        )
        .await
        .unwrap();
    let draft = invoice("acme", CUSTOMER, vec![line("a", 1000)]);

    let first = harness
        .context
        .apps
        .upsert_invoice(&app.id, &draft)
        .await
        .unwrap();
    assert!(first.external_invoice_id.starts_with("sandbox_in_"));
    assert!(first.line_external_ids["a"].starts_with("sandbox_il_"));

    let resynced = with_external_id(
        invoice(
            "acme",
            CUSTOMER,
            vec![synced_line("a", 1000, &first.line_external_ids["a"])],
        ),
        &first,
    );
    let second = harness
        .context
        .apps
        .upsert_invoice(&app.id, &resynced)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert!(harness.stripe.calls().await.is_empty());
}
