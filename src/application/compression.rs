//! Image compression pipeline.
//!
//! Detects animated GIFs, plans output dimensions and fans out to a WebP and
//! an AVIF encode. A failed encode degrades to an absent variant; only a
//! failure to read the source dimensions fails the whole call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join;
use metrics::{counter, histogram};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const METRIC_VARIANT_FAILED: &str = "pictura_compression_variant_failed_total";
const METRIC_COMPRESSION_MS: &str = "pictura_compression_ms";

/// Upper bound on either AVIF axis, applied on top of the general bound.
pub const AVIF_MAX_DIMENSION: u32 = 1600;

const DEFAULT_QUALITY: u32 = 90;
const DEFAULT_MAX_DIMENSION: u32 = 3840;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("could not read image dimensions: {0}")]
    Dimensions(String),
    #[error("{format} encode failed: {message}")]
    Encode {
        format: TargetFormat,
        message: String,
    },
}

impl CompressionError {
    pub fn encode(format: TargetFormat, message: impl Into<String>) -> Self {
        Self::Encode {
            format,
            message: message.into(),
        }
    }
}

/// Knobs accepted by the pipeline; also the `[compression]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub quality: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub preserve_animation: bool,
    pub generate_webp: bool,
    pub generate_avif: bool,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            preserve_animation: true,
            generate_webp: true,
            generate_avif: true,
        }
    }
}

impl CompressionOptions {
    /// Reads the multipart option fields, falling back to `defaults` for
    /// absent, non-numeric or negative values. Zero is kept as sent.
    pub fn from_form_fields(fields: &HashMap<String, String>, defaults: &Self) -> Self {
        let number = |name: &str, default: u32| {
            fields
                .get(name)
                .and_then(|value| parse_leading_int(value))
                .unwrap_or(default)
        };
        let flag = |name: &str, default: bool| match fields.get(name) {
            None => default,
            Some(value) => value != "false",
        };

        Self {
            quality: number("quality", defaults.quality),
            max_width: number("maxWidth", defaults.max_width),
            max_height: number("maxHeight", defaults.max_height),
            preserve_animation: flag("preserveAnimation", defaults.preserve_animation),
            generate_webp: flag("generateWebp", defaults.generate_webp),
            generate_avif: flag("generateAvif", defaults.generate_avif),
        }
    }
}

/// Parses an optional sign followed by leading digits, ignoring any suffix.
///
/// Negative and digit-less inputs yield `None`.
fn parse_leading_int(value: &str) -> Option<u32> {
    let trimmed = value.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];
    if digits.is_empty() || negative {
        return None;
    }
    Some(digits.parse::<u32>().unwrap_or(u32::MAX))
}

/// Counts graphic control extensions (`0x21 0xF9`) and image descriptors
/// (`0x2C`); more than one marker means more than one frame.
pub fn is_animated_gif(bytes: &[u8]) -> bool {
    let mut markers = 0_u32;
    for window in bytes.windows(2) {
        if window[0] == 0x21 && window[1] == 0xF9 {
            markers += 1;
            if markers > 1 {
                return true;
            }
        }
        if window[0] == 0x2C {
            markers += 1;
            if markers > 1 {
                return true;
            }
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Scales `source` uniformly so it fits inside `max_width` x `max_height`.
/// Sources that already fit are returned unchanged.
pub fn fit_within(source: Dimensions, max_width: u32, max_height: u32) -> Dimensions {
    if source.width <= max_width && source.height <= max_height {
        return source;
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(source.width),
        f64::from(max_height) / f64::from(source.height),
    );
    Dimensions {
        width: scale_axis(source.width, scale),
        height: scale_axis(source.height, scale),
    }
}

fn scale_axis(value: u32, scale: f64) -> u32 {
    let scaled = (f64::from(value) * scale).round();
    if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Webp,
    Avif,
}

impl TargetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resize policy. Only scale-down is used: outputs never exceed the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    ScaleDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformRequest {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub format: TargetFormat,
    pub quality: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub data: Bytes,
    pub content_type: String,
    pub size: u64,
}

impl From<EncodedImage> for CompressedImage {
    fn from(encoded: EncodedImage) -> Self {
        Self {
            size: encoded.data.len() as u64,
            data: encoded.data,
            content_type: encoded.content_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    pub original: Bytes,
    pub is_animated: bool,
    pub webp: Option<CompressedImage>,
    pub avif: Option<CompressedImage>,
}

pub trait ImageDecoder: Send + Sync {
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, CompressionError>;
}

#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(
        &self,
        bytes: Bytes,
        request: TransformRequest,
    ) -> Result<EncodedImage, CompressionError>;
}

#[derive(Clone)]
pub struct CompressionService {
    decoder: Arc<dyn ImageDecoder>,
    transformer: Arc<dyn ImageTransformer>,
}

impl CompressionService {
    pub fn new(decoder: Arc<dyn ImageDecoder>, transformer: Arc<dyn ImageTransformer>) -> Self {
        Self {
            decoder,
            transformer,
        }
    }

    #[instrument(skip(self, data, options), fields(bytes = data.len()))]
    pub async fn compress(
        &self,
        data: Bytes,
        format: &str,
        options: &CompressionOptions,
    ) -> Result<CompressionResult, CompressionError> {
        let started_at = Instant::now();
        let is_animated = format.eq_ignore_ascii_case("gif") && is_animated_gif(&data);

        if is_animated && options.preserve_animation {
            debug!("Keeping animated GIF as is");
            histogram!(METRIC_COMPRESSION_MS, "outcome" => "animated")
                .record(started_at.elapsed().as_secs_f64() * 1000.0);
            return Ok(CompressionResult {
                original: data,
                is_animated: true,
                webp: None,
                avif: None,
            });
        }

        let source = self.decoder.dimensions(&data)?;
        let general = fit_within(source, options.max_width, options.max_height);
        let avif_bound = fit_within(
            source,
            options.max_width.min(AVIF_MAX_DIMENSION),
            options.max_height.min(AVIF_MAX_DIMENSION),
        );

        let webp = self.encode_if(
            options.generate_webp,
            &data,
            TargetFormat::Webp,
            general,
            options.quality,
        );
        let avif = self.encode_if(
            options.generate_avif,
            &data,
            TargetFormat::Avif,
            avif_bound,
            options.quality,
        );
        let (webp, avif) = join(webp, avif).await;

        histogram!(METRIC_COMPRESSION_MS, "outcome" => "encoded")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(CompressionResult {
            original: data,
            is_animated: false,
            webp,
            avif,
        })
    }

    async fn encode_if(
        &self,
        enabled: bool,
        data: &Bytes,
        format: TargetFormat,
        target: Dimensions,
        quality: u32,
    ) -> Option<CompressedImage> {
        if !enabled {
            return None;
        }
        let request = TransformRequest {
            width: target.width,
            height: target.height,
            fit: Fit::ScaleDown,
            format,
            quality,
        };
        match self.transformer.transform(data.clone(), request).await {
            Ok(encoded) => Some(encoded.into()),
            Err(err) => {
                warn!(
                    format = format.as_str(),
                    width = target.width,
                    height = target.height,
                    error = %err,
                    "Variant encode failed"
                );
                counter!(METRIC_VARIANT_FAILED, "format" => format.as_str()).increment(1);
                None
            }
        }
    }
}
