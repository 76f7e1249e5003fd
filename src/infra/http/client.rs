//! reqwest-backed gallery API client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::application::pagination::ListingQuery;
use crate::application::repos::{ImagesRepo, RepoError};
use crate::config::ApiSettings;
use crate::domain::{ImageRecord, ListingPage};
use crate::infra::error::InfraError;
use pictura_api_types::{
    DeleteResponse, ImageDetailResponse, TagListResponse, UpdateImageRequest, UpdateResponse,
};

const IMAGES_PATH: &str = "api/images";
const TAGS_PATH: &str = "api/tags";

#[derive(Clone, Debug)]
pub struct HttpImagesRepo {
    client: Client,
    base: Url,
}

impl HttpImagesRepo {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            base: normalize_base(&settings.base_url),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("pictura/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, RepoError> {
        self.base.join(path).map_err(RepoError::transport)
    }

    fn image_url(&self, id: &str) -> Result<Url, RepoError> {
        let mut url = self.url(IMAGES_PATH)?;
        url.path_segments_mut()
            .map_err(|()| RepoError::transport("base URL cannot carry a path"))?
            .push(id);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RepoError> {
        let response = request.send().await.map_err(RepoError::transport)?;
        handle(response).await
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "Calling gallery API");
        self.client.request(method, url)
    }
}

async fn handle<T: DeserializeOwned>(response: Response) -> Result<T, RepoError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(RepoError::transport)?;
    if status == StatusCode::NOT_FOUND {
        return Err(RepoError::NotFound);
    }
    if !status.is_success() {
        return Err(RepoError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    serde_json::from_slice(&bytes).map_err(RepoError::decode)
}

/// Joins treat the last segment as a directory only with a trailing slash.
fn normalize_base(base: &Url) -> Url {
    let mut base = base.clone();
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait]
impl ImagesRepo for HttpImagesRepo {
    async fn list_images(&self, query: &ListingQuery) -> Result<ListingPage, RepoError> {
        let mut url = self.url(IMAGES_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.query_pairs() {
                pairs.append_pair(key, &value);
            }
        }
        self.send(self.request(Method::GET, url)).await
    }

    async fn get_image(&self, id: &str) -> Result<ImageRecord, RepoError> {
        let url = self.image_url(id)?;
        let body: ImageDetailResponse = self.send(self.request(Method::GET, url)).await?;
        if !body.success {
            return Err(RepoError::rejected(
                body.message
                    .unwrap_or_else(|| "Failed to load image".to_string()),
            ));
        }
        body.image.ok_or(RepoError::NotFound)
    }

    async fn update_image(
        &self,
        id: &str,
        request: &UpdateImageRequest,
    ) -> Result<ImageRecord, RepoError> {
        let url = self.image_url(id)?;
        let body: UpdateResponse = self
            .send(self.request(Method::PUT, url).json(request))
            .await?;
        match body {
            UpdateResponse {
                success: true,
                image: Some(image),
            } => Ok(image),
            _ => Err(RepoError::rejected("Failed to update image")),
        }
    }

    async fn delete_image(&self, id: &str) -> Result<(), RepoError> {
        let url = self.image_url(id)?;
        let body: DeleteResponse = self.send(self.request(Method::DELETE, url)).await?;
        if body.success {
            Ok(())
        } else {
            Err(RepoError::rejected(
                body.message
                    .unwrap_or_else(|| "Failed to delete image".to_string()),
            ))
        }
    }

    async fn list_tags(&self) -> Result<Vec<String>, RepoError> {
        let url = self.url(TAGS_PATH)?;
        let body: TagListResponse = self.send(self.request(Method::GET, url)).await?;
        if !body.success {
            return Err(RepoError::rejected("Failed to load tags"));
        }
        Ok(body.tags)
    }
}
