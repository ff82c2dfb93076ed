use crate::error::{AppError, AppResult};

use super::models::{AppListing, CapabilityType};

impl AppListing {
    /// Fails on the first required capability the listing does not declare.
    pub fn validate_capabilities(&self, required: &[CapabilityType]) -> AppResult<()> {
        for capability in required {
            let declared = self
                .capabilities
                .iter()
                .any(|declared| declared.capability_type == *capability);
            if !declared {
                return Err(AppError::validation(format!(
                    "capability {capability} is not supported by app type {}",
                    self.app_type
                )));
            }
        }
        Ok(())
    }

    pub fn supports(&self, capability: CapabilityType) -> bool {
        self.capabilities
            .iter()
            .any(|declared| declared.capability_type == capability)
    }
}
