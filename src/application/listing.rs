//! Listing cache controller.
//!
//! Paged and infinite listings share one store and one read-time overlay
//! projection. Fetch results are written through fetch tickets so that a
//! response arriving after an optimistic edit is discarded instead of
//! clobbering it.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::application::error::AppError;
use crate::application::overlay::{placeholder_page, project_page, project_pages};
use crate::application::pagination::{ListingQuery, next_page_param};
use crate::application::repos::ImagesRepo;
use crate::cache::{
    CacheConfig, CacheKey, CachedValue, InfinitePages, KeyScope, ListingFilter, QueryStore,
};
use crate::domain::listing::{validate_page, validate_page_size};
use crate::domain::{ImageRecord, ListingPage, Orientation};

/// A paged listing as served to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub page: ListingPage,
    /// True when built from the overlay alone while no fetched page exists.
    pub placeholder: bool,
}

#[derive(Clone)]
pub struct ListingCache {
    repo: Arc<dyn ImagesRepo>,
    store: Arc<QueryStore>,
    config: CacheConfig,
}

impl ListingCache {
    pub fn new(repo: Arc<dyn ImagesRepo>, store: Arc<QueryStore>, config: CacheConfig) -> Self {
        Self {
            repo,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }

    /// Listing identity using the configured page size.
    pub fn filter(&self, tag: Option<String>, orientation: Option<Orientation>) -> ListingFilter {
        ListingFilter::new(self.config.page_size, tag, orientation)
    }

    fn overlay(&self) -> Option<Arc<CachedValue>> {
        self.store.get(&CacheKey::recent_uploads())
    }

    pub fn recent_uploads(&self) -> Vec<ImageRecord> {
        self.overlay()
            .as_deref()
            .and_then(CachedValue::as_images)
            .map(<[ImageRecord]>::to_vec)
            .unwrap_or_default()
    }

    /// Puts `record` at the head of the overlay, replacing any older copy.
    pub fn remember_upload(&self, record: ImageRecord) {
        if !record.has_id() {
            debug!("Ignoring unidentified upload");
            return;
        }
        self.store.update(CacheKey::recent_uploads(), |current| {
            let earlier = current.and_then(CachedValue::as_images).unwrap_or(&[]);
            let mut images = Vec::with_capacity(earlier.len() + 1);
            images.extend(earlier.iter().filter(|image| image.id != record.id).cloned());
            images.insert(0, record);
            Some(CachedValue::Images(images))
        });
    }

    pub fn placeholder_page(&self, query: &ListingQuery) -> Option<ListingPage> {
        if !query.is_first_page() {
            return None;
        }
        let overlay = self.overlay();
        let images = overlay.as_deref().and_then(CachedValue::as_images)?;
        placeholder_page(images, &query.filter())
    }

    fn project(&self, page: &ListingPage, query: &ListingQuery) -> ListingPage {
        let overlay = self.overlay();
        let images = overlay
            .as_deref()
            .and_then(CachedValue::as_images)
            .unwrap_or(&[]);
        project_page(page, query.page, images, &query.filter())
    }

    /// Whatever can be shown without a fetch: the projected cached page,
    /// otherwise the overlay placeholder.
    pub fn peek_page(&self, query: &ListingQuery) -> Option<PageView> {
        let key = CacheKey::image_list(query.filter(), Some(query.page));
        if let Some(page) = self.store.get(&key).as_deref().and_then(CachedValue::as_page) {
            return Some(PageView {
                page: self.project(page, query),
                placeholder: false,
            });
        }
        self.placeholder_page(query).map(|page| PageView {
            page,
            placeholder: true,
        })
    }

    #[instrument(skip(self), fields(page = query.page, limit = query.limit))]
    pub async fn get_page(&self, query: &ListingQuery) -> Result<ListingPage, AppError> {
        validate_page(query.page)?;
        validate_page_size(query.limit)?;

        let key = CacheKey::image_list(query.filter(), Some(query.page));
        if let Some(cached) = self.store.get_fresh(&key, self.config.list_stale_time())
            && let Some(page) = cached.as_page()
        {
            debug!(%key, "Serving cached listing page");
            return Ok(self.project(page, query));
        }
        self.refetch_page(query).await
    }

    /// Fetches the page regardless of freshness. On failure the cached entry
    /// is left as it was.
    #[instrument(skip(self), fields(page = query.page, limit = query.limit))]
    pub async fn refetch_page(&self, query: &ListingQuery) -> Result<ListingPage, AppError> {
        let key = CacheKey::image_list(query.filter(), Some(query.page));
        let ticket = self.store.begin_fetch(key.clone());
        let fetched = self.repo.list_images(query).await?;

        if self
            .store
            .complete_fetch(&ticket, CachedValue::Page(fetched.clone()))
        {
            return Ok(self.project(&fetched, query));
        }

        debug!(%key, "Listing fetch superseded, serving current entry");
        let current = self.store.get(&key);
        let page = current
            .as_deref()
            .and_then(CachedValue::as_page)
            .unwrap_or(&fetched);
        Ok(self.project(page, query))
    }

    pub fn infinite(&self, filter: ListingFilter) -> InfiniteListing {
        InfiniteListing {
            key: CacheKey::image_list(filter.clone(), None),
            filter,
            cache: self.clone(),
        }
    }
}

/// Flattened, projected view of an infinite listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfiniteView {
    pub pages: Vec<ListingPage>,
    pub images: Vec<ImageRecord>,
    /// First page's total after projection.
    pub total: u64,
    pub has_next_page: bool,
    pub placeholder: bool,
}

impl InfiniteView {
    fn from_pages(pages: InfinitePages, has_next_page: bool, placeholder: bool) -> Self {
        let images = pages
            .pages
            .iter()
            .flat_map(|page| page.images.iter().cloned())
            .collect();
        let total = pages.pages.first().map_or(0, |page| page.total);
        Self {
            pages: pages.pages,
            images,
            total,
            has_next_page,
            placeholder,
        }
    }
}

/// Infinite-scroll handle over one listing identity.
pub struct InfiniteListing {
    cache: ListingCache,
    filter: ListingFilter,
    key: CacheKey,
}

impl InfiniteListing {
    pub fn filter(&self) -> &ListingFilter {
        &self.filter
    }

    fn cached(&self) -> Option<Arc<CachedValue>> {
        self.cache.store.get(&self.key)
    }

    fn project(&self, pages: &InfinitePages) -> InfinitePages {
        let overlay = self.cache.overlay();
        let images = overlay
            .as_deref()
            .and_then(CachedValue::as_images)
            .unwrap_or(&[]);
        project_pages(pages, images, &self.filter)
    }

    fn present(&self, pages: &InfinitePages) -> InfiniteView {
        let has_next = pages.last_page().and_then(next_page_param).is_some();
        InfiniteView::from_pages(self.project(pages), has_next, false)
    }

    /// Cached pages through the projection, otherwise the overlay placeholder.
    pub fn view(&self) -> Option<InfiniteView> {
        if let Some(pages) = self.cached().as_deref().and_then(CachedValue::as_pages) {
            return Some(self.present(pages));
        }
        let overlay = self.cache.overlay();
        let images = overlay.as_deref().and_then(CachedValue::as_images)?;
        let placeholder = placeholder_page(images, &self.filter)?;
        Some(InfiniteView::from_pages(
            InfinitePages::first(placeholder, 1),
            false,
            true,
        ))
    }

    pub fn has_next_page(&self) -> bool {
        self.cached()
            .as_deref()
            .and_then(CachedValue::as_pages)
            .and_then(InfinitePages::last_page)
            .and_then(next_page_param)
            .is_some()
    }

    /// Serves fresh pages from cache. Stale pages are refetched from page 1
    /// up to the number previously loaded.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Result<InfiniteView, AppError> {
        let cached = self.cached();
        let loaded = cached.as_deref().and_then(CachedValue::as_pages);
        if let Some(pages) = loaded
            && self
                .cache
                .store
                .get_fresh(&self.key, self.cache.config.list_stale_time())
                .is_some()
        {
            return Ok(self.present(pages));
        }
        let page_count = loaded.map_or(1, |pages| pages.pages.len().max(1));
        self.fetch_pages(page_count).await
    }

    async fn fetch_pages(&self, page_count: usize) -> Result<InfiniteView, AppError> {
        let ticket = self.cache.store.begin_fetch(self.key.clone());

        let mut fetched = InfinitePages::default();
        let mut cursor = Some(1);
        while let Some(param) = cursor {
            let page = self
                .cache
                .repo
                .list_images(&ListingQuery::for_page(&self.filter, param))
                .await?;
            cursor = next_page_param(&page);
            fetched.push(page, param);
            if fetched.pages.len() >= page_count {
                break;
            }
        }
        info!(pages = fetched.pages.len(), "Loaded infinite listing");

        if self
            .cache
            .store
            .complete_fetch(&ticket, CachedValue::Pages(fetched.clone()))
        {
            return Ok(self.present(&fetched));
        }
        debug!(key = %self.key, "Listing fetch superseded, serving current entry");
        let current = self.cached();
        let pages = current
            .as_deref()
            .and_then(CachedValue::as_pages)
            .unwrap_or(&fetched);
        Ok(self.present(pages))
    }

    /// Appends the next page. Returns `false` without fetching when the last
    /// loaded page is the final one.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn fetch_next_page(&self) -> Result<bool, AppError> {
        let cached = self.cached();
        let Some(pages) = cached.as_deref().and_then(CachedValue::as_pages) else {
            self.fetch_pages(1).await?;
            return Ok(true);
        };
        let Some(param) = pages.last_page().and_then(next_page_param) else {
            return Ok(false);
        };

        let ticket = self.cache.store.begin_fetch(self.key.clone());
        let page = self
            .cache
            .repo
            .list_images(&ListingQuery::for_page(&self.filter, param))
            .await?;
        let written = self.cache.store.complete_fetch_with(&ticket, |current| {
            let mut pages = current
                .and_then(CachedValue::as_pages)
                .cloned()
                .unwrap_or_default();
            pages.push(page, param);
            CachedValue::Pages(pages)
        });
        if written.is_none() {
            debug!(key = %self.key, param, "Next page superseded");
        }
        Ok(true)
    }

    /// Drops every cached listing and loads this one again from page 1.
    pub async fn refetch(&self) -> Result<InfiniteView, AppError> {
        let removed = self.cache.store.remove_matching(&KeyScope::ImageLists);
        debug!(removed, "Dropped cached listings before refetch");
        self.fetch_pages(1).await
    }
}
