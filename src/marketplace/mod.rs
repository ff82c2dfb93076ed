//! App marketplace: listing catalogue and capability declarations.

pub mod capability;
pub mod models;
pub mod registry;

pub use models::{AppListing, AppType, Capability, CapabilityType};
pub use registry::{MarketplaceRegistry, RegistryItem};
