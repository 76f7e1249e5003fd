//! Listing query parameters and the page-cursor rule.

use crate::cache::ListingFilter;
use crate::domain::error::DomainError;
use crate::domain::listing::{DEFAULT_PAGE_SIZE, validate_page, validate_page_size};
use crate::domain::{ListingPage, Orientation};

/// One request against the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub page: u32,
    pub limit: u32,
    pub tag: Option<String>,
    pub orientation: Option<Orientation>,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            tag: None,
            orientation: None,
        }
    }
}

impl ListingQuery {
    pub fn new(
        page: u32,
        limit: u32,
        tag: Option<String>,
        orientation: Option<Orientation>,
    ) -> Result<Self, DomainError> {
        let filter = ListingFilter::new(validate_page_size(limit)?, tag, orientation);
        Ok(Self::for_page(&filter, validate_page(page)?))
    }

    pub fn for_page(filter: &ListingFilter, page: u32) -> Self {
        Self {
            page,
            limit: filter.limit,
            tag: filter.tag.clone(),
            orientation: filter.orientation,
        }
    }

    pub fn filter(&self) -> ListingFilter {
        ListingFilter::new(self.limit, self.tag.clone(), self.orientation)
    }

    pub fn is_first_page(&self) -> bool {
        self.page == 1
    }

    /// Query-string pairs; filters appear only when set.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("page", self.page.to_string()), ("limit", self.limit.to_string())];
        if let Some(tag) = self.tag.as_deref().filter(|tag| !tag.is_empty()) {
            pairs.push(("tag", tag.to_string()));
        }
        if let Some(orientation) = self.orientation {
            pairs.push(("orientation", orientation.as_str().to_string()));
        }
        pairs
    }
}

/// Cursor for the page after `last`, if the server reports one.
pub fn next_page_param(last: &ListingPage) -> Option<u32> {
    (last.page < last.total_pages).then(|| last.page + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page: u32, total_pages: u32) -> ListingPage {
        ListingPage {
            images: Vec::new(),
            page,
            total: 0,
            total_pages,
        }
    }

    #[test]
    fn query_pairs_skip_absent_filters() {
        let query = ListingQuery::default();
        assert_eq!(
            query.query_pairs(),
            vec![("page", "1".to_string()), ("limit", "24".to_string())]
        );

        let query = ListingQuery::new(3, 12, Some("cat".into()), Some(Orientation::Square))
            .expect("valid query");
        assert_eq!(
            query.query_pairs(),
            vec![
                ("page", "3".to_string()),
                ("limit", "12".to_string()),
                ("tag", "cat".to_string()),
                ("orientation", "square".to_string()),
            ]
        );
    }

    #[test]
    fn new_rejects_out_of_range_values() {
        assert!(matches!(
            ListingQuery::new(0, 24, None, None),
            Err(DomainError::PageZero)
        ));
        assert!(matches!(
            ListingQuery::new(1, 101, None, None),
            Err(DomainError::PageSize { value: 101, .. })
        ));
    }

    #[test]
    fn cursor_advances_until_last_page() {
        assert_eq!(next_page_param(&page(1, 3)), Some(2));
        assert_eq!(next_page_param(&page(3, 3)), None);
        assert_eq!(next_page_param(&page(1, 1)), None);
    }
}
