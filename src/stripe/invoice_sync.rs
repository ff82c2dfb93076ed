//! Invoice synchronization against Stripe.
//!
//! The internal invoice is a tree; Stripe invoices are flat. Only leaf lines
//! produce provider line items: one for the line itself and one negative item
//! per discount. Every item is tagged with the internal ids it came from so
//! responses can be matched back without relying on ordering.

use std::collections::{BTreeMap, HashMap, HashSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::apps::ensure_same_namespace;
use crate::billing::{
    normalize_currency, to_minor_units, FinalizeInvoiceResult, Invoice, InvoiceLine, LineKind,
    SyncResult,
};
use crate::error::{AppError, AppResult};
use crate::marketplace::CapabilityType;

use super::app::StripeApp;
use super::models::{
    AddInvoiceLine, CreateInvoiceParams, StripeInvoice, StripeInvoiceLine, StripePeriod,
    UpdateInvoiceLine, UpdateInvoiceParams, LINE_TYPE_DISCOUNT, LINE_TYPE_LINE,
    METADATA_CUSTOMER_ID, METADATA_DISCOUNT_ID, METADATA_INVOICE_ID, METADATA_LINE_ID,
    METADATA_LINE_TYPE, METADATA_NAMESPACE,
};

const INVOICING: &[CapabilityType] = &[CapabilityType::InvoiceCustomers];
const INVOICING_AND_PAYMENT: &[CapabilityType] = &[
    CapabilityType::InvoiceCustomers,
    CapabilityType::CollectPayments,
];

/// Internal entity a provider line item stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LineTarget {
    Line(String),
    Discount { line_id: String, discount_id: String },
}

impl LineTarget {
    fn from_metadata(metadata: &BTreeMap<String, String>) -> Option<Self> {
        let line_id = metadata.get(METADATA_LINE_ID)?.clone();
        match metadata.get(METADATA_LINE_TYPE).map(String::as_str) {
            Some(LINE_TYPE_LINE) => Some(LineTarget::Line(line_id)),
            Some(LINE_TYPE_DISCOUNT) => Some(LineTarget::Discount {
                line_id,
                discount_id: metadata.get(METADATA_DISCOUNT_ID)?.clone(),
            }),
            _ => None,
        }
    }

    fn metadata(&self, invoice_id: &str) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([(
            METADATA_INVOICE_ID.to_string(),
            invoice_id.to_string(),
        )]);
        match self {
            LineTarget::Line(line_id) => {
                metadata.insert(METADATA_LINE_ID.into(), line_id.clone());
                metadata.insert(METADATA_LINE_TYPE.into(), LINE_TYPE_LINE.into());
            }
            LineTarget::Discount {
                line_id,
                discount_id,
            } => {
                metadata.insert(METADATA_LINE_ID.into(), line_id.clone());
                metadata.insert(METADATA_LINE_TYPE.into(), LINE_TYPE_DISCOUNT.into());
                metadata.insert(METADATA_DISCOUNT_ID.into(), discount_id.clone());
            }
        }
        metadata
    }

    fn record(&self, result: &mut SyncResult, external_id: String) {
        match self {
            LineTarget::Line(line_id) => {
                result.line_external_ids.insert(line_id.clone(), external_id);
            }
            LineTarget::Discount { discount_id, .. } => {
                result
                    .discount_external_ids
                    .insert(discount_id.clone(), external_id);
            }
        }
    }
}

/// One provider line item the invoice should end up with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DesiredItem {
    pub target: LineTarget,
    pub external_id: Option<String>,
    pub description: String,
    pub amount: i64,
    pub quantity: u64,
    pub period: StripePeriod,
    pub metadata: BTreeMap<String, String>,
}

impl DesiredItem {
    fn to_add(&self) -> AddInvoiceLine {
        AddInvoiceLine {
            description: self.description.clone(),
            amount: self.amount,
            quantity: self.quantity,
            period: self.period,
            metadata: self.metadata.clone(),
        }
    }

    fn to_update(&self, external_id: &str) -> UpdateInvoiceLine {
        UpdateInvoiceLine {
            id: external_id.to_string(),
            description: self.description.clone(),
            amount: self.amount,
            quantity: self.quantity,
            metadata: self.metadata.clone(),
        }
    }
}

/// Flattens the live leaf lines of `invoice` in breadth-first order.
pub(crate) fn desired_items(invoice: &Invoice, currency: &str) -> AppResult<Vec<DesiredItem>> {
    let mut items = Vec::new();
    for line in invoice.leaf_lines() {
        let period = StripePeriod::from_range(line.period.start, line.period.end);
        let target = LineTarget::Line(line.id.clone());
        let (quantity, description) = provider_quantity(line);
        items.push(DesiredItem {
            metadata: target.metadata(&invoice.id),
            target,
            external_id: line.external_ids.invoicing.clone(),
            description,
            amount: to_minor_units(line.amount, currency)?,
            quantity,
            period,
        });

        for discount in line.discounts.iter().filter(|d| d.deleted_at.is_none()) {
            let target = LineTarget::Discount {
                line_id: line.id.clone(),
                discount_id: discount.id.clone(),
            };
            items.push(DesiredItem {
                metadata: target.metadata(&invoice.id),
                target,
                external_id: discount.external_ids.invoicing.clone(),
                description: discount
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("{} (discount)", line.name)),
                amount: -to_minor_units(discount.amount.abs(), currency)?,
                quantity: 1,
                period,
            });
        }
    }
    Ok(items)
}

/// Stripe line quantities are whole numbers. Fractional usage is billed as one
/// unit carrying the full amount, with the measured quantity in the description.
fn provider_quantity(line: &InvoiceLine) -> (u64, String) {
    let description = line_description(line);
    if line.kind == LineKind::Fee {
        return (1, description);
    }
    match whole_quantity(line.quantity) {
        Some(quantity) => (quantity, description),
        None => (
            1,
            format!("{description} ({} units)", line.quantity.normalize()),
        ),
    }
}

fn whole_quantity(quantity: Decimal) -> Option<u64> {
    if quantity.is_sign_negative() || !quantity.fract().is_zero() {
        return None;
    }
    quantity.to_u64()
}

fn line_description(line: &InvoiceLine) -> String {
    match &line.description {
        Some(description) if !description.trim().is_empty() => {
            format!("{}: {description}", line.name)
        }
        _ => line.name.clone(),
    }
}

/// Stable across retries, so a lost create response never yields a second invoice.
pub(crate) fn invoice_idempotency_key(invoice: &Invoice) -> String {
    let mut hasher = Sha256::new();
    hasher.update(invoice.namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(invoice.id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Batches computed once per sync, before any of them is applied.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SyncPlan {
    pub add: Vec<DesiredItem>,
    pub update: Vec<(String, DesiredItem)>,
    pub remove: Vec<String>,
}

pub(crate) fn plan_sync(existing: &[StripeInvoiceLine], desired: Vec<DesiredItem>) -> SyncPlan {
    let mut remaining: HashSet<&str> = existing.iter().map(|line| line.id.as_str()).collect();
    let tagged: HashMap<LineTarget, &str> = existing
        .iter()
        .filter_map(|line| {
            LineTarget::from_metadata(&line.metadata).map(|target| (target, line.id.as_str()))
        })
        .collect();

    let mut plan = SyncPlan::default();
    for item in desired {
        let matched = match &item.external_id {
            Some(external_id) => remaining
                .contains(external_id.as_str())
                .then(|| external_id.clone()),
            // An untracked item may already exist when an earlier sync lost its response.
            None => tagged
                .get(&item.target)
                .filter(|id| remaining.contains(*id))
                .map(|id| id.to_string()),
        };

        match matched {
            Some(external_id) => {
                remaining.remove(external_id.as_str());
                plan.update.push((external_id, item));
            }
            None => {
                if let Some(stale) = &item.external_id {
                    tracing::warn!(
                        external_line_id = %stale,
                        target = ?item.target,
                        "stripe line no longer on invoice, re-adding"
                    );
                }
                plan.add.push(item);
            }
        }
    }

    plan.remove = existing
        .iter()
        .filter(|line| remaining.contains(line.id.as_str()))
        .map(|line| line.id.clone())
        .collect();
    plan
}

/// Maps freshly added items to their provider ids, by tag first and by
/// response position (offset by the lines that existed before) otherwise.
pub(crate) fn map_added_lines(
    result: &mut SyncResult,
    added: &[DesiredItem],
    response: &[StripeInvoiceLine],
    prior_count: usize,
) -> AppResult<()> {
    let tagged: HashMap<LineTarget, &str> = response
        .iter()
        .filter_map(|line| {
            LineTarget::from_metadata(&line.metadata).map(|target| (target, line.id.as_str()))
        })
        .collect();

    for (index, item) in added.iter().enumerate() {
        let external_id = match tagged.get(&item.target) {
            Some(id) => id.to_string(),
            None => response
                .get(prior_count + index)
                .map(|line| line.id.clone())
                .ok_or_else(|| {
                    AppError::Inconsistency(format!(
                        "stripe returned {} lines, expected at least {}",
                        response.len(),
                        prior_count + index + 1
                    ))
                })?,
        };
        item.target.record(result, external_id);
    }
    Ok(())
}

impl StripeApp {
    pub async fn validate_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        self.validate_customer(&invoice.customer(), INVOICING_AND_PAYMENT)
            .await
    }

    /// Creates or reconciles the Stripe invoice. Not safe for concurrent calls
    /// on the same invoice.
    pub async fn upsert_invoice(&self, invoice: &Invoice) -> AppResult<SyncResult> {
        let customer = invoice.customer();
        ensure_same_namespace(&self.base.id, &customer)?;
        self.base.listing.validate_capabilities(INVOICING)?;
        let currency = normalize_currency(&invoice.currency)?;
        let desired = desired_items(invoice, &currency)?;
        let client = self.client().await?;

        let stripe_invoice = match invoice.external_ids.invoicing.as_deref() {
            None => {
                let data = self.require_customer_data(&customer).await?;
                let metadata = BTreeMap::from([
                    (METADATA_NAMESPACE.to_string(), invoice.namespace.clone()),
                    (METADATA_INVOICE_ID.to_string(), invoice.id.clone()),
                    (METADATA_CUSTOMER_ID.to_string(), invoice.customer_id.clone()),
                ]);
                let mut created = self
                    .call(
                        client
                            .create_invoice(CreateInvoiceParams {
                                idempotency_key: invoice_idempotency_key(invoice),
                                customer_id: data.external_customer_id,
                                currency: currency.clone(),
                                default_payment_method_id: data.default_payment_method_id,
                                due_date: invoice.due_at,
                                metadata,
                            })
                            .await,
                    )
                    .await?;
                if created.replayed {
                    // The replayed response predates any lines added by the earlier attempt.
                    created.lines = self
                        .call(client.list_invoice_lines(&created.id).await)
                        .await?;
                    tracing::info!(
                        invoice_id = %invoice.id,
                        stripe_invoice_id = %created.id,
                        lines = created.lines.len(),
                        "stripe invoice create replayed"
                    );
                } else {
                    tracing::info!(
                        invoice_id = %invoice.id,
                        stripe_invoice_id = %created.id,
                        "stripe invoice created"
                    );
                }
                created
            }
            Some(external_id) => {
                let data = self.find_customer_data(&customer).await?;
                self.call(
                    client
                        .update_invoice(UpdateInvoiceParams {
                            invoice_id: external_id.to_string(),
                            default_payment_method_id: data
                                .and_then(|data| data.default_payment_method_id),
                            due_date: invoice.due_at,
                        })
                        .await,
                )
                .await?
            }
        };

        let mut result = SyncResult {
            external_invoice_id: stripe_invoice.id.clone(),
            invoice_number: stripe_invoice.number.clone(),
            ..SyncResult::default()
        };
        let prior_count = stripe_invoice.lines.len();
        let plan = plan_sync(&stripe_invoice.lines, desired);
        tracing::debug!(
            invoice_id = %invoice.id,
            add = plan.add.len(),
            update = plan.update.len(),
            remove = plan.remove.len(),
            "stripe line sync planned"
        );

        if !plan.add.is_empty() {
            let lines = plan.add.iter().map(DesiredItem::to_add).collect();
            let updated: StripeInvoice = self
                .call(client.add_invoice_lines(&stripe_invoice.id, lines).await)
                .await?;
            map_added_lines(&mut result, &plan.add, &updated.lines, prior_count)?;
        }

        if !plan.update.is_empty() {
            let lines = plan
                .update
                .iter()
                .map(|(external_id, item)| item.to_update(external_id))
                .collect();
            self.call(client.update_invoice_lines(&stripe_invoice.id, lines).await)
                .await?;
            for (external_id, item) in plan.update {
                item.target.record(&mut result, external_id);
            }
        }

        if !plan.remove.is_empty() {
            self.call(
                client
                    .remove_invoice_lines(&stripe_invoice.id, plan.remove)
                    .await,
            )
            .await?;
        }

        Ok(result)
    }

    pub async fn delete_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        ensure_same_namespace(&self.base.id, &invoice.customer())?;
        self.base.listing.validate_capabilities(INVOICING)?;
        let Some(external_id) = invoice.external_ids.invoicing.as_deref() else {
            return Ok(());
        };
        let client = self.client().await?;
        self.call(client.delete_invoice(external_id).await).await?;
        tracing::info!(invoice_id = %invoice.id, stripe_invoice_id = external_id, "stripe invoice deleted");
        Ok(())
    }

    pub async fn finalize_invoice(&self, invoice: &Invoice) -> AppResult<FinalizeInvoiceResult> {
        ensure_same_namespace(&self.base.id, &invoice.customer())?;
        self.base.listing.validate_capabilities(INVOICING_AND_PAYMENT)?;
        let external_id = invoice.external_ids.invoicing.as_deref().ok_or_else(|| {
            AppError::validation(format!("invoice {} has not been synced to stripe", invoice.id))
        })?;
        let client = self.client().await?;
        let finalized = self.call(client.finalize_invoice(external_id).await).await?;
        Ok(FinalizeInvoiceResult {
            invoice_number: finalized.number,
            payment_external_id: finalized.payment_intent_id,
        })
    }
}
