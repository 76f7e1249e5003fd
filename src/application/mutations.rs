//! Optimistic mutation controller.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, instrument, warn};

use crate::application::error::AppError;
use crate::application::repos::ImagesRepo;
use crate::cache::{CacheKey, CacheSnapshot, CachedValue, InfinitePages, KeyScope, QueryStore};
use crate::domain::ImageRecord;
use crate::domain::listing::{validate_id, without_image};
use pictura_api_types::UpdateImageRequest;

const METRIC_MUTATION_ROLLBACK: &str = "pictura_mutation_rollback_total";

#[derive(Clone)]
pub struct ImageMutations {
    repo: Arc<dyn ImagesRepo>,
    store: Arc<QueryStore>,
}

impl ImageMutations {
    pub fn new(repo: Arc<dyn ImagesRepo>, store: Arc<QueryStore>) -> Self {
        Self { repo, store }
    }

    /// Removes `id` from every cached listing before the remote delete and
    /// puts every listing back exactly as it was if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<String, AppError> {
        let id = validate_id(id)?;

        // Cancellation and rewrite happen before the first await.
        self.store.cancel_in_flight(&KeyScope::ImageLists);
        let pending = PendingRollback::new(
            self.store.clone(),
            self.store
                .patch_matching(&KeyScope::ImageLists, |value| remove_from_listing(value, id)),
        );

        match self.repo.delete_image(id).await {
            Ok(()) => {
                let patched = pending.commit();
                self.store.remove_matching(&KeyScope::ImageDetail(id.to_string()));
                info!(patched, "Deleted image");
                Ok(id.to_string())
            }
            Err(err) => {
                let restored = pending.roll_back();
                warn!(restored, error = %err, "Delete failed, listings rolled back");
                Err(err.into())
            }
        }
    }

    /// No optimistic phase; the cache changes only after the server accepts.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: &str,
        request: &UpdateImageRequest,
    ) -> Result<ImageRecord, AppError> {
        let id = validate_id(id)?;

        let record = self.repo.update_image(id, request).await?;
        let detail_id = if record.has_id() { record.id.clone() } else { id.to_string() };
        self.store
            .set(CacheKey::image_detail(detail_id), CachedValue::Detail(record.clone()));
        let lists = self.store.invalidate_matching(&KeyScope::ImageLists);
        self.store.invalidate_matching(&KeyScope::TagList);
        info!(invalidated_lists = lists, "Updated image");
        Ok(record)
    }

    /// Marks every listing stale so the next read refetches it.
    pub fn invalidate_all_listings(&self) -> usize {
        self.store.invalidate_matching(&KeyScope::ImageLists)
    }
}

/// Restores the snapshotted listings unless committed, including when the
/// owning future is dropped mid-await.
struct PendingRollback {
    store: Arc<QueryStore>,
    snapshot: Option<CacheSnapshot>,
}

impl PendingRollback {
    fn new(store: Arc<QueryStore>, snapshot: CacheSnapshot) -> Self {
        Self {
            store,
            snapshot: Some(snapshot),
        }
    }

    fn commit(mut self) -> usize {
        self.snapshot.take().map_or(0, |snapshot| snapshot.len())
    }

    fn roll_back(mut self) -> usize {
        self.restore()
    }

    fn restore(&mut self) -> usize {
        let Some(snapshot) = self.snapshot.take() else {
            return 0;
        };
        let restored = snapshot.len();
        self.store.restore(snapshot);
        counter!(METRIC_MUTATION_ROLLBACK, "op" => "delete").increment(1);
        restored
    }
}

impl Drop for PendingRollback {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            let restored = self.restore();
            warn!(restored, "Delete abandoned before completion, listings rolled back");
        }
    }
}

/// Drops `id` from a cached listing value, lowering each page's total by one.
fn remove_from_listing(value: &CachedValue, id: &str) -> Option<CachedValue> {
    match value {
        CachedValue::Page(page) => Some(CachedValue::Page(without_image(page, id))),
        CachedValue::Pages(pages) => Some(CachedValue::Pages(InfinitePages {
            pages: pages
                .pages
                .iter()
                .map(|page| without_image(page, id))
                .collect(),
            page_params: pages.page_params.clone(),
        })),
        _ => None,
    }
}
