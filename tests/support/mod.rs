//! In-memory gallery used by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use pictura::application::overlay::matches_filters;
use pictura::application::pagination::ListingQuery;
use pictura::application::repos::{ImagesRepo, RepoError};
use pictura::domain::listing::total_pages;
use pictura::domain::{ImageRecord, ListingPage, Orientation};
use pictura_api_types::UpdateImageRequest;
use tokio::sync::{Mutex, Notify};

pub fn image(id: &str, orientation: Orientation, tags: &[&str]) -> ImageRecord {
    ImageRecord::new(
        id,
        orientation,
        tags.iter().map(|tag| tag.to_string()).collect(),
    )
}

pub fn ids(images: &[ImageRecord]) -> Vec<&str> {
    images.iter().map(|image| image.id.as_str()).collect()
}

#[derive(Debug, Default)]
pub struct GalleryState {
    pub images: Vec<ImageRecord>,
    pub tags: Vec<String>,
    pub fail_list: bool,
    pub fail_delete: bool,
    pub reject_delete: bool,
    pub fail_update: bool,
    /// Delete calls never resolve while set.
    pub hang_delete: bool,
    /// Listing calls block on [`FakeGallery::release`] while set.
    pub gated: bool,
    pub list_calls: usize,
    pub detail_calls: usize,
    pub tag_calls: usize,
    pub update_calls: usize,
    pub deleted: Vec<String>,
}

#[derive(Default)]
pub struct FakeGallery {
    pub state: Mutex<GalleryState>,
    /// Signalled when a gated listing call has started.
    pub entered: Notify,
    pub release: Notify,
}

impl FakeGallery {
    pub fn with_images(images: Vec<ImageRecord>) -> Arc<Self> {
        let gallery = Self::default();
        gallery.state.try_lock().expect("fresh lock").images = images;
        Arc::new(gallery)
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    fn page_of(state: &GalleryState, query: &ListingQuery) -> ListingPage {
        let matching: Vec<ImageRecord> = state
            .images
            .iter()
            .filter(|image| matches_filters(image, query.tag.as_deref(), query.orientation))
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let start = ((query.page - 1) * query.limit) as usize;
        ListingPage {
            images: matching
                .into_iter()
                .skip(start)
                .take(query.limit as usize)
                .collect(),
            page: query.page,
            total,
            total_pages: total_pages(total, query.limit),
        }
    }
}

#[async_trait]
impl ImagesRepo for FakeGallery {
    async fn list_images(&self, query: &ListingQuery) -> Result<ListingPage, RepoError> {
        let (page, gated) = {
            let mut state = self.state.lock().await;
            state.list_calls += 1;
            if state.fail_list {
                return Err(RepoError::transport("connection reset"));
            }
            (Self::page_of(&state, query), state.gated)
        };
        if gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(page)
    }

    async fn get_image(&self, id: &str) -> Result<ImageRecord, RepoError> {
        let mut state = self.state.lock().await;
        state.detail_calls += 1;
        state
            .images
            .iter()
            .find(|image| image.id == id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update_image(
        &self,
        id: &str,
        request: &UpdateImageRequest,
    ) -> Result<ImageRecord, RepoError> {
        let mut state = self.state.lock().await;
        state.update_calls += 1;
        if state.fail_update {
            return Err(RepoError::rejected("Failed to update image"));
        }
        let image = state
            .images
            .iter_mut()
            .find(|image| image.id == id)
            .ok_or(RepoError::NotFound)?;
        if let Some(tags) = &request.tags {
            image.tags = tags.clone();
        }
        if let Some(minutes) = request.expiry_minutes {
            image.expiry_time = Some(format!("+{minutes}m"));
        }
        Ok(image.clone())
    }

    async fn delete_image(&self, id: &str) -> Result<(), RepoError> {
        if self.state.lock().await.hang_delete {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().await;
        if state.fail_delete {
            return Err(RepoError::Status {
                status: 500,
                body: "storage offline".to_string(),
            });
        }
        if state.reject_delete {
            return Err(RepoError::rejected("Failed to delete image"));
        }
        state.images.retain(|image| image.id != id);
        state.deleted.push(id.to_string());
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<String>, RepoError> {
        let mut state = self.state.lock().await;
        state.tag_calls += 1;
        Ok(state.tags.clone())
    }
}
