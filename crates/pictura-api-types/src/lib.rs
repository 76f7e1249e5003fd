//! Wire types for the pictura gallery API.
//!
//! Every payload is camelCase JSON. Response envelopes carry a `success`
//! flag; a well-formed body with `success: false` is a rejection, not a
//! transport failure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Aspect class of an image as reported by the gallery server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Square => "square",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string does not name a known orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOrientation(pub String);

impl fmt::Display for UnknownOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown orientation `{}`", self.0)
    }
}

impl std::error::Error for UnknownOrientation {}

impl FromStr for Orientation {
    type Err = UnknownOrientation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "landscape" => Ok(Self::Landscape),
            "portrait" => Ok(Self::Portrait),
            "square" => Ok(Self::Square),
            _ => Err(UnknownOrientation(value.to_string())),
        }
    }
}

/// Public URLs of the stored renditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageUrls {
    pub original: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avif: Option<String>,
}

/// One gallery image.
///
/// An empty `id` marks an unidentified record; caches never index those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    pub orientation: Orientation,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub urls: ImageUrls,
}

impl ImageRecord {
    /// Minimal record carrying only the fields the listing cache interprets.
    pub fn new(id: impl Into<String>, orientation: Orientation, tags: Vec<String>) -> Self {
        Self {
            id: id.into(),
            original_name: String::new(),
            upload_time: String::new(),
            expiry_time: None,
            orientation,
            tags,
            format: String::new(),
            width: 0,
            height: 0,
            size: 0,
            urls: ImageUrls::default(),
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

/// One page of `GET /api/images`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    pub page: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetailResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagListResponse {
    pub success: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of `PUT /api/images/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateImageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_minutes: Option<u32>,
}

/// One encoded rendition returned by `POST /api/compress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedVariant {
    pub content_type: String,
    pub size: u64,
    /// Standard base64 of the encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResponse {
    pub success: bool,
    pub is_animated: bool,
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp: Option<CompressedVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avif: Option<CompressedVariant>,
}
