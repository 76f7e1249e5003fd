//! `POST /api/compress`.

use std::collections::HashMap;

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use mime_guess::mime::{self, Mime};
use pictura_api_types::{CompressedVariant, CompressionResponse};
use tracing::{debug, info};

use super::HttpState;
use super::error::ApiError;
use crate::application::compression::{CompressedImage, CompressionOptions};

const FILE_FIELD: &str = "file";

struct CompressUpload {
    data: Bytes,
    format: String,
    fields: HashMap<String, String>,
}

pub(super) async fn compress(
    State(state): State<HttpState>,
    multipart: Multipart,
) -> Result<Json<CompressionResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let options = CompressionOptions::from_form_fields(&upload.fields, &state.defaults);
    debug!(
        format = %upload.format,
        bytes = upload.data.len(),
        quality = options.quality,
        "Compressing upload"
    );

    let result = state
        .compression
        .compress(upload.data, &upload.format, &options)
        .await?;
    info!(
        is_animated = result.is_animated,
        webp = result.webp.is_some(),
        avif = result.avif.is_some(),
        "Compressed upload"
    );

    Ok(Json(CompressionResponse {
        success: true,
        is_animated: result.is_animated,
        original_size: result.original.len() as u64,
        webp: result.webp.map(variant),
        avif: result.avif.map(variant),
    }))
}

fn variant(image: CompressedImage) -> CompressedVariant {
    CompressedVariant {
        content_type: image.content_type,
        size: image.size,
        data: STANDARD.encode(&image.data),
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<CompressUpload, ApiError> {
    let mut data = None;
    let mut format = String::new();
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == FILE_FIELD {
            format = source_format(field.content_type(), field.file_name());
            data = Some(field.bytes().await.map_err(multipart_error)?);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    let data = data.ok_or_else(|| ApiError::bad_request("missing file", None))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("empty file", None));
    }
    Ok(CompressUpload {
        data,
        format,
        fields,
    })
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(Some(err.body_text()))
    } else {
        ApiError::bad_request("invalid multipart payload", Some(err.body_text()))
    }
}

/// Image subtype of the upload (`gif`, `png`, ...) from its declared content
/// type, falling back to the file extension.
fn source_format(content_type: Option<&str>, file_name: Option<&str>) -> String {
    let declared = content_type
        .and_then(|value| value.parse::<Mime>().ok())
        .filter(|declared| declared.type_() == mime::IMAGE);
    let guessed = || {
        file_name
            .and_then(|name| mime_guess::from_path(name).first())
            .filter(|guessed| guessed.type_() == mime::IMAGE)
    };
    declared
        .or_else(guessed)
        .map(|found| found.subtype().as_str().to_ascii_lowercase())
        .unwrap_or_default()
}
