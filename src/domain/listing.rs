//! Listing page arithmetic.

use std::collections::HashSet;

use super::error::DomainError;
use super::{ImageRecord, ListingPage};

/// Page size used when callers do not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 24;

/// Largest page the listing endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// `max(1, ceil(total / page_size))`, treating a zero page size as 1.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

pub fn validate_page_size(value: u32) -> Result<u32, DomainError> {
    if value == 0 || value > MAX_PAGE_SIZE {
        return Err(DomainError::PageSize {
            value,
            max: MAX_PAGE_SIZE,
        });
    }
    Ok(value)
}

pub fn validate_page(value: u32) -> Result<u32, DomainError> {
    if value == 0 {
        return Err(DomainError::PageZero);
    }
    Ok(value)
}

pub fn validate_id(id: &str) -> Result<&str, DomainError> {
    if id.trim().is_empty() {
        return Err(DomainError::MissingId);
    }
    Ok(id)
}

/// Ids of the identified records across `pages`.
pub fn collect_ids<'a>(pages: impl IntoIterator<Item = &'a ListingPage>) -> HashSet<&'a str> {
    pages
        .into_iter()
        .flat_map(|page| page.images.iter())
        .filter(|image| image.has_id())
        .map(|image| image.id.as_str())
        .collect()
}

/// Copy of `page` with every record carrying `id` removed and the total
/// lowered by one.
pub fn without_image(page: &ListingPage, id: &str) -> ListingPage {
    ListingPage {
        images: page
            .images
            .iter()
            .filter(|image| image.id != id)
            .cloned()
            .collect::<Vec<ImageRecord>>(),
        page: page.page,
        total: page.total.saturating_sub(1),
        total_pages: page.total_pages,
    }
}
