//! Port to the remote gallery API.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::ListingQuery;
use crate::domain::{ImageRecord, ListingPage};
use pictura_api_types::UpdateImageRequest;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{message}")]
    Rejected { message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ImagesRepo: Send + Sync {
    async fn list_images(&self, query: &ListingQuery) -> Result<ListingPage, RepoError>;

    async fn get_image(&self, id: &str) -> Result<ImageRecord, RepoError>;

    /// Returns the server's copy of the updated record.
    async fn update_image(
        &self,
        id: &str,
        request: &UpdateImageRequest,
    ) -> Result<ImageRecord, RepoError>;

    async fn delete_image(&self, id: &str) -> Result<(), RepoError>;

    async fn list_tags(&self) -> Result<Vec<String>, RepoError>;
}
