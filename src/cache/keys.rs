//! Cache key definitions.
//!
//! Keys are hierarchical: every key belongs to a root segment (`images`,
//! `tags`, `config`) and [`KeyScope`] addresses a prefix of that hierarchy
//! for bulk removal, invalidation and fetch cancellation.

use std::fmt;

use crate::domain::Orientation;

/// Identity of a listing: page size plus optional filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingFilter {
    pub limit: u32,
    pub tag: Option<String>,
    pub orientation: Option<Orientation>,
}

impl ListingFilter {
    /// Normalises blank tags to "no filter".
    pub fn new(limit: u32, tag: Option<String>, orientation: Option<Orientation>) -> Self {
        Self {
            limit,
            tag: tag.filter(|tag| !tag.trim().is_empty()),
            orientation,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Paged listings carry a page number, infinite listings do not.
    ImageList {
        filter: ListingFilter,
        page: Option<u32>,
    },
    RecentUploads,
    ImageDetail(String),
    TagList,
    Config,
}

impl CacheKey {
    pub fn image_list(filter: ListingFilter, page: Option<u32>) -> Self {
        Self::ImageList { filter, page }
    }

    pub fn recent_uploads() -> Self {
        Self::RecentUploads
    }

    pub fn image_detail(id: impl Into<String>) -> Self {
        Self::ImageDetail(id.into())
    }

    pub fn tag_list() -> Self {
        Self::TagList
    }

    pub fn config() -> Self {
        Self::Config
    }

    pub fn is_listing(&self) -> bool {
        matches!(self, Self::ImageList { .. })
    }

    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImageList { page: Some(_), .. } => "list_paged",
            Self::ImageList { page: None, .. } => "list_infinite",
            Self::RecentUploads => "recent_uploads",
            Self::ImageDetail(_) => "detail",
            Self::TagList => "tags",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageList { filter, page } => {
                write!(f, "images/list/limit={}", filter.limit)?;
                if let Some(tag) = filter.tag() {
                    write!(f, ",tag={tag}")?;
                }
                if let Some(orientation) = filter.orientation {
                    write!(f, ",orientation={orientation}")?;
                }
                if let Some(page) = page {
                    write!(f, ",page={page}")?;
                }
                Ok(())
            }
            Self::RecentUploads => f.write_str("images/recentUploads"),
            Self::ImageDetail(id) => write!(f, "images/detail/{id}"),
            Self::TagList => f.write_str("tags/list"),
            Self::Config => f.write_str("config"),
        }
    }
}

/// A key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    Images,
    ImageLists,
    ImageDetails,
    ImageDetail(String),
    RecentUploads,
    Tags,
    TagList,
    Config,
}

impl KeyScope {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match (self, key) {
            (
                Self::Images,
                CacheKey::ImageList { .. } | CacheKey::RecentUploads | CacheKey::ImageDetail(_),
            ) => true,
            (Self::ImageLists, CacheKey::ImageList { .. }) => true,
            (Self::ImageDetails, CacheKey::ImageDetail(_)) => true,
            (Self::ImageDetail(scope_id), CacheKey::ImageDetail(id)) => scope_id == id,
            (Self::RecentUploads, CacheKey::RecentUploads) => true,
            (Self::Tags | Self::TagList, CacheKey::TagList) => true,
            (Self::Config, CacheKey::Config) => true,
            _ => false,
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Images => f.write_str("images"),
            Self::ImageLists => f.write_str("images/list"),
            Self::ImageDetails => f.write_str("images/detail"),
            Self::ImageDetail(id) => write!(f, "images/detail/{id}"),
            Self::RecentUploads => f.write_str("images/recentUploads"),
            Self::Tags => f.write_str("tags"),
            Self::TagList => f.write_str("tags/list"),
            Self::Config => f.write_str("config"),
        }
    }
}
