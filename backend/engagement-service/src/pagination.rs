//! Page-based list contract shared by every list operation.
//!
//! Wire shape is `{ "hasNextPage": bool, "items": [...] }` with a fixed page
//! size of 10. Ordering of the underlying set is decided by the caller.

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Engine-wide page size
pub const ITEMS_PER_PAGE: usize = 10;

/// Validated 1-based page number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest(u32);

impl PageRequest {
    pub fn new(page: u32) -> ServiceResult<Self> {
        if page == 0 {
            return Err(ServiceError::InvalidInput(
                "page must be greater than or equal to 1".to_string(),
            ));
        }
        Ok(Self(page))
    }

    pub fn first() -> Self {
        Self(1)
    }

    fn start(&self) -> usize {
        (self.0 as usize - 1).saturating_mul(ITEMS_PER_PAGE)
    }

    fn end(&self) -> usize {
        (self.0 as usize).saturating_mul(ITEMS_PER_PAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub has_next_page: bool,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            has_next_page: false,
            items: Vec::new(),
        }
    }

    /// Keep the `has_next_page` flag but swap in hydrated items
    pub fn with_items<U>(self, items: Vec<U>) -> Page<U> {
        Page {
            has_next_page: self.has_next_page,
            items,
        }
    }
}

/// Slice a fully ordered result set into the requested page
pub fn paginate<T>(all: Vec<T>, page: PageRequest) -> Page<T> {
    let total = all.len();
    let start = page.start();
    if start >= total {
        return Page::empty();
    }

    let end = page.end().min(total);
    let items = all.into_iter().skip(start).take(end - start).collect();

    Page {
        has_next_page: total > page.end(),
        items,
    }
}
