use std::collections::HashMap;
use std::sync::Arc;

use crate::apps::AppFactory;
use crate::error::{AppError, AppResult, NotFoundKind};
use crate::pagination::{Page, PagedResponse};

use super::models::{AppListing, AppType};

/// key: marketplace-registry-item -> listing + factory
#[derive(Clone)]
pub struct RegistryItem {
    pub listing: AppListing,
    pub factory: Arc<dyn AppFactory>,
}

/// key: marketplace-registry -> app type catalog
///
/// Built once while wiring the process and then shared behind an `Arc`.
/// Registration takes `&mut self`, so a registry that has been handed out can
/// no longer change.
#[derive(Default)]
pub struct MarketplaceRegistry {
    items: Vec<RegistryItem>,
    index: HashMap<AppType, usize>,
}

impl MarketplaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        listing: AppListing,
        factory: Arc<dyn AppFactory>,
    ) -> AppResult<()> {
        if self.index.contains_key(&listing.app_type) {
            return Err(AppError::validation(format!(
                "app type {} is already registered",
                listing.app_type
            )));
        }
        for capability in &listing.capabilities {
            capability.validate()?;
        }

        tracing::debug!(app_type = %listing.app_type, "registering marketplace listing");
        self.index.insert(listing.app_type, self.items.len());
        self.items.push(RegistryItem { listing, factory });
        Ok(())
    }

    pub fn get(&self, app_type: AppType) -> AppResult<&RegistryItem> {
        self.index
            .get(&app_type)
            .and_then(|position| self.items.get(*position))
            .ok_or_else(|| AppError::not_found(NotFoundKind::Listing, app_type))
    }

    pub fn get_listing(&self, app_type: AppType) -> AppResult<&AppListing> {
        self.get(app_type).map(|item| &item.listing)
    }

    /// Listings in registration order.
    pub fn list(&self, page: Page) -> AppResult<PagedResponse<AppListing>> {
        page.validate()?;
        let listings: Vec<AppListing> = self.items.iter().map(|item| item.listing.clone()).collect();
        Ok(PagedResponse::from_slice(page, &listings))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
