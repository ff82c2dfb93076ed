use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const MAX_PAGE_SIZE: u32 = 1000;

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default = "default_page_number")]
    pub page_number: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_number() -> u32 {
    1
}

fn default_page_size() -> u32 {
    100
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page_number: default_page_number(),
            page_size: default_page_size(),
        }
    }
}

impl Page {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.page_number == 0 {
            return Err(AppError::validation("page number must be at least 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(AppError::validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        (self.page_number.saturating_sub(1) as usize) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedResponse<T> {
    pub page: Page,
    pub total_count: usize,
    pub items: Vec<T>,
}

impl<T: Clone> PagedResponse<T> {
    /// Cuts one page out of an in-memory, already ordered collection.
    pub fn from_slice(page: Page, all: &[T]) -> Self {
        let items = all
            .iter()
            .skip(page.offset())
            .take(page.limit())
            .cloned()
            .collect();
        Self {
            page,
            total_count: all.len(),
            items,
        }
    }
}
