//! Cached detail and tag lookups.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::application::error::AppError;
use crate::application::repos::ImagesRepo;
use crate::cache::{CacheConfig, CacheKey, CachedValue, QueryStore};
use crate::domain::ImageRecord;
use crate::domain::listing::validate_id;

const TAG_LIST_STALE: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct ImageLookup {
    repo: Arc<dyn ImagesRepo>,
    store: Arc<QueryStore>,
    detail_stale: Duration,
}

impl ImageLookup {
    pub fn new(repo: Arc<dyn ImagesRepo>, store: Arc<QueryStore>, config: &CacheConfig) -> Self {
        Self {
            repo,
            store,
            detail_stale: config.detail_stale_time(),
        }
    }

    pub fn peek_detail(&self, id: &str) -> Option<ImageRecord> {
        self.store
            .get(&CacheKey::image_detail(id))
            .as_deref()
            .and_then(CachedValue::as_detail)
            .cloned()
    }

    #[instrument(skip(self))]
    pub async fn get_detail(&self, id: &str) -> Result<ImageRecord, AppError> {
        let id = validate_id(id)?;
        let key = CacheKey::image_detail(id);
        if let Some(cached) = self.store.get_fresh(&key, self.detail_stale)
            && let Some(record) = cached.as_detail()
        {
            debug!("Serving cached image detail");
            return Ok(record.clone());
        }

        let ticket = self.store.begin_fetch(key);
        let record = self.repo.get_image(id).await?;
        self.store
            .complete_fetch(&ticket, CachedValue::Detail(record.clone()));
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_tags(&self) -> Result<Vec<String>, AppError> {
        let key = CacheKey::tag_list();
        if let Some(cached) = self.store.get_fresh(&key, TAG_LIST_STALE)
            && let Some(tags) = cached.as_tags()
        {
            return Ok(tags.to_vec());
        }

        let ticket = self.store.begin_fetch(key);
        let tags = self.repo.list_tags().await?;
        self.store.complete_fetch(&ticket, CachedValue::Tags(tags.clone()));
        Ok(tags)
    }
}
