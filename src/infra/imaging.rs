//! Raster adapters for the compression pipeline.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError as RasterError};
use imagesize::ImageError;

use crate::application::compression::{
    CompressionError, Dimensions, EncodedImage, Fit, ImageDecoder, ImageTransformer, TargetFormat,
    TransformRequest,
};

/// 1 is slowest/best, 10 fastest.
const AVIF_SPEED: u8 = 6;

/// Reads dimensions from the container header without decoding pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagesizeDecoder;

impl ImageDecoder for ImagesizeDecoder {
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, CompressionError> {
        let size = imagesize::blob_size(bytes).map_err(|err| match err {
            ImageError::NotSupported => {
                CompressionError::Dimensions("unsupported image format".to_string())
            }
            ImageError::CorruptedImage => {
                CompressionError::Dimensions("corrupted image".to_string())
            }
            ImageError::IoError(err) => CompressionError::Dimensions(err.to_string()),
        })?;
        let width = u32::try_from(size.width)
            .map_err(|_| CompressionError::Dimensions("width out of range".to_string()))?;
        let height = u32::try_from(size.height)
            .map_err(|_| CompressionError::Dimensions("height out of range".to_string()))?;
        Ok(Dimensions::new(width, height))
    }
}

/// Decodes and scales down with the `image` crate, then encodes lossy WebP
/// through libwebp or AVIF through `image`, all on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterTransformer;

#[async_trait]
impl ImageTransformer for RasterTransformer {
    async fn transform(
        &self,
        bytes: Bytes,
        request: TransformRequest,
    ) -> Result<EncodedImage, CompressionError> {
        let format = request.format;
        tokio::task::spawn_blocking(move || encode(&bytes, request))
            .await
            .map_err(|err| CompressionError::encode(format, format!("encode task failed: {err}")))?
    }
}

fn encode(bytes: &[u8], request: TransformRequest) -> Result<EncodedImage, CompressionError> {
    let format = request.format;
    let raster_err = |err: RasterError| CompressionError::encode(format, err.to_string());

    let source = image::load_from_memory(bytes).map_err(raster_err)?;
    let resized = match request.fit {
        Fit::ScaleDown if request.width < source.width() || request.height < source.height() => {
            source.resize(request.width, request.height, FilterType::Lanczos3)
        }
        Fit::ScaleDown => source,
    };
    let pixels = DynamicImage::ImageRgba8(resized.to_rgba8());

    let data = match format {
        TargetFormat::Webp => {
            let rgba = pixels.to_rgba8();
            let quality = request.quality.min(100) as f32;
            webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, quality)
                .map_err(|err| CompressionError::encode(format, format!("{err:?}")))?
                .to_vec()
        }
        TargetFormat::Avif => {
            let quality = u8::try_from(request.quality.clamp(1, 100)).unwrap_or(100);
            let mut out = Cursor::new(Vec::new());
            pixels
                .write_with_encoder(AvifEncoder::new_with_speed_quality(
                    &mut out,
                    AVIF_SPEED,
                    quality,
                ))
                .map_err(raster_err)?;
            out.into_inner()
        }
    };

    Ok(EncodedImage {
        data: Bytes::from(data),
        content_type: content_type(format),
    })
}

fn content_type(format: TargetFormat) -> String {
    mime_guess::from_ext(format.as_str())
        .first_raw()
        .map_or_else(|| format!("image/{format}"), str::to_string)
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, RgbaImage};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn decoder_reads_png_header() {
        let bytes = png(12, 7);
        let dims = ImagesizeDecoder.dimensions(&bytes).expect("dimensions");
        assert_eq!(dims, Dimensions::new(12, 7));
    }

    #[test]
    fn decoder_rejects_garbage() {
        assert!(matches!(
            ImagesizeDecoder.dimensions(b"not an image"),
            Err(CompressionError::Dimensions(_))
        ));
    }

    #[tokio::test]
    async fn webp_output_is_scaled_down() {
        let request = TransformRequest {
            width: 8,
            height: 4,
            fit: Fit::ScaleDown,
            format: TargetFormat::Webp,
            quality: 90,
        };
        let encoded = RasterTransformer
            .transform(Bytes::from(png(16, 8)), request)
            .await
            .expect("webp encode");

        assert_eq!(encoded.content_type, "image/webp");
        let size = imagesize::blob_size(&encoded.data).expect("webp header");
        assert_eq!((size.width, size.height), (8, 4));
    }

    fn noisy_png(side: u32) -> Vec<u8> {
        let mut seed = 0x2545_f491_u32;
        let pixels = RgbaImage::from_fn(side, side, |_, _| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let [r, g, b, _] = seed.to_le_bytes();
            image::Rgba([r, g, b, 255])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(pixels)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    async fn webp_at(source: &[u8], quality: u32) -> Bytes {
        let request = TransformRequest {
            width: 64,
            height: 64,
            fit: Fit::ScaleDown,
            format: TargetFormat::Webp,
            quality,
        };
        RasterTransformer
            .transform(Bytes::copy_from_slice(source), request)
            .await
            .expect("webp encode")
            .data
    }

    #[tokio::test]
    async fn webp_is_lossy_and_honours_quality() {
        let source = noisy_png(64);
        let low = webp_at(&source, 10).await;
        let high = webp_at(&source, 95).await;

        assert!(low.windows(4).any(|chunk| chunk == b"VP8 "));
        assert!(!low.windows(4).any(|chunk| chunk == b"VP8L"));
        assert!(low.len() < high.len(), "{} >= {}", low.len(), high.len());
    }

    #[tokio::test]
    async fn never_upscales() {
        let request = TransformRequest {
            width: 100,
            height: 100,
            fit: Fit::ScaleDown,
            format: TargetFormat::Webp,
            quality: 90,
        };
        let encoded = RasterTransformer
            .transform(Bytes::from(png(10, 6)), request)
            .await
            .expect("webp encode");
        let size = imagesize::blob_size(&encoded.data).expect("webp header");
        assert_eq!((size.width, size.height), (10, 6));
    }

    #[tokio::test]
    async fn undecodable_source_is_an_encode_error() {
        let request = TransformRequest {
            width: 10,
            height: 10,
            fit: Fit::ScaleDown,
            format: TargetFormat::Avif,
            quality: 50,
        };
        let err = RasterTransformer
            .transform(Bytes::from_static(b"garbage"), request)
            .await
            .expect_err("cannot decode");
        assert!(matches!(
            err,
            CompressionError::Encode {
                format: TargetFormat::Avif,
                ..
            }
        ));
    }
}
