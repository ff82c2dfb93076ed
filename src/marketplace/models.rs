use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// key: marketplace-app-type -> one variant per provider kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    Stripe,
    Sandbox,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Stripe => "stripe",
            AppType::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "stripe" => Ok(AppType::Stripe),
            "sandbox" => Ok(AppType::Sandbox),
            other => Err(AppError::validation(format!("unknown app type: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    ReportUsage,
    ReportEvents,
    CalculateTax,
    InvoiceCustomers,
    CollectPayments,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::ReportUsage => "report_usage",
            CapabilityType::ReportEvents => "report_events",
            CapabilityType::CalculateTax => "calculate_tax",
            CapabilityType::InvoiceCustomers => "invoice_customers",
            CapabilityType::CollectPayments => "collect_payments",
        }
    }

    /// Capabilities whose use depends on live provider-side customer state.
    pub fn requires_provider_customer(&self) -> bool {
        matches!(
            self,
            CapabilityType::CalculateTax
                | CapabilityType::InvoiceCustomers
                | CapabilityType::CollectPayments
        )
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: marketplace-capability -> declared functionality
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,
    pub key: String,
    pub name: String,
    pub description: String,
}

impl Capability {
    pub fn new(
        capability_type: CapabilityType,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            capability_type,
            key: capability_type.as_str().to_string(),
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn calculate_tax() -> Self {
        Self::new(
            CapabilityType::CalculateTax,
            "Calculate Tax",
            "Calculate tax for a payment",
        )
    }

    pub fn invoice_customers() -> Self {
        Self::new(
            CapabilityType::InvoiceCustomers,
            "Invoice Customers",
            "Invoice customers",
        )
    }

    pub fn collect_payments() -> Self {
        Self::new(
            CapabilityType::CollectPayments,
            "Collect Payments",
            "Collect payments",
        )
    }

    pub(crate) fn validate(&self) -> Result<(), AppError> {
        let missing = if self.key.trim().is_empty() {
            Some("key")
        } else if self.name.trim().is_empty() {
            Some("name")
        } else if self.description.trim().is_empty() {
            Some("description")
        } else {
            None
        };
        match missing {
            Some(field) => Err(AppError::validation(format!(
                "capability {} is missing {field}",
                self.capability_type
            ))),
            None => Ok(()),
        }
    }
}

/// key: marketplace-listing -> immutable catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppListing {
    #[serde(rename = "type")]
    pub app_type: AppType,
    pub name: String,
    pub description: String,
    pub icon_url: String,
    pub capabilities: Vec<Capability>,
}
