use async_trait::async_trait;

use crate::error::{AppError, AppResult};

use super::installed::InstalledApp;
use super::models::{AppBase, AppId, InstallInput, InstallWithApiKeyInput};

/// key: apps-factory -> per type construction, install and uninstall
#[async_trait]
pub trait AppFactory: Send + Sync {
    /// Builds the typed instance for a persisted app row.
    async fn new_app(&self, base: AppBase) -> AppResult<InstalledApp>;

    async fn install_with_api_key(&self, _input: InstallWithApiKeyInput) -> AppResult<AppId> {
        Err(AppError::validation(
            "app type does not support api key installation",
        ))
    }

    async fn install(&self, _input: InstallInput) -> AppResult<AppId> {
        Err(AppError::validation(
            "app type requires credentials to install",
        ))
    }

    /// Removes provider side resources. The app row is deleted by the caller.
    async fn uninstall(&self, app: &AppBase) -> AppResult<()>;
}
