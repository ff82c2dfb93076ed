use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::apps::CustomerId;

/// key: billing-period -> service period of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoicing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Flat fee; the amount already reflects the total.
    Fee,
    UsageBased,
}

/// key: billing-line-discount -> amount taken off a leaf line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDiscount {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Positive amount subtracted from the line total.
    pub amount: Decimal,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// key: billing-invoice-line -> node of the invoice line tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: LineKind,
    pub period: Period,
    pub quantity: Decimal,
    /// Total amount before discounts, in major currency units.
    pub amount: Decimal,
    #[serde(default)]
    pub discounts: Vec<LineDiscount>,
    #[serde(default)]
    pub children: Vec<InvoiceLine>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InvoiceLine {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// key: billing-invoice -> internally modeled invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub namespace: String,
    pub customer_id: String,
    #[serde(default)]
    pub number: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub external_ids: ExternalIds,
}

impl Invoice {
    pub fn customer(&self) -> CustomerId {
        CustomerId::new(self.namespace.clone(), self.customer_id.clone())
    }

    /// Live leaf lines in breadth-first order. Deleted lines hide their subtree.
    pub fn leaf_lines(&self) -> Vec<&InvoiceLine> {
        let mut queue: VecDeque<&InvoiceLine> = self.lines.iter().collect();
        let mut leaves = Vec::new();
        while let Some(line) = queue.pop_front() {
            if line.is_deleted() {
                continue;
            }
            if line.is_leaf() {
                leaves.push(line);
            } else {
                queue.extend(line.children.iter());
            }
        }
        leaves
    }
}

/// key: billing-sync-result -> internal to external id mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub external_invoice_id: String,
    pub invoice_number: Option<String>,
    pub line_external_ids: HashMap<String, String>,
    pub discount_external_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeInvoiceResult {
    pub invoice_number: Option<String>,
    pub payment_external_id: Option<String>,
}
