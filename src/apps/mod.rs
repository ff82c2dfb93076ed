//! Installed apps: persistence, typed instances and the install orchestrator.

pub mod api;
pub mod factory;
pub mod installed;
pub mod models;
pub mod service;
pub mod store;
pub mod testing;

pub use factory::AppFactory;
pub use installed::InstalledApp;
pub use models::{
    ensure_same_namespace, AppBase, AppId, AppRecord, AppStatus, CreateAppInput, CustomerData,
    CustomerId, InstallInput, InstallWithApiKeyInput,
};
pub use service::AppService;
pub use store::{AppStore, PgAppStore};
