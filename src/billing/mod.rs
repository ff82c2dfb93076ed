//! Invoice model read by provider apps during synchronization.

pub mod currency;
pub mod models;

pub use currency::{minor_unit_exponent, normalize_currency, to_minor_units};
pub use models::{
    ExternalIds, FinalizeInvoiceResult, Invoice, InvoiceLine, LineDiscount, LineKind, Period,
    SyncResult,
};
