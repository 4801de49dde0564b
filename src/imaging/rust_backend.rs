//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP) | `image::load_from_memory` |
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Orient | `DynamicImage::{rotate90, rotate180, rotate270, fliph, flipv}` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode | per-format encoders in `image::codecs` |

use super::backend::{BackendError, ImageBackend, ImageSize};
use super::calculations::{self, Plan};
use super::orientation;
use super::params::{OutputFormat, Quality, RenderParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::borrow::Cow;
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, BackendError> {
    image::load_from_memory(data)
        .map_err(|e| BackendError::CorruptSource(format!("Failed to decode: {e}")))
}

/// Crop then resize according to `plan`.
fn transform(img: DynamicImage, plan: &Plan) -> DynamicImage {
    if plan.is_identity((img.width(), img.height())) {
        return img;
    }

    let img = match plan.crop {
        Some(rect) => img.crop_imm(rect.left, rect.top, rect.width(), rect.height()),
        None => img,
    };

    let (width, height) = plan.output;
    if (img.width(), img.height()) == (width, height) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Reduce exotic pixel layouts (16-bit, float) to 8-bit for encoders that
/// only take 8-bit input.
fn to_8bit(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => Cow::Borrowed(img),
        other if other.color().has_alpha() => {
            Cow::Owned(DynamicImage::ImageRgba8(other.to_rgba8()))
        }
        other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
    }
}

/// PNG keeps 16-bit depth but has no float variant.
fn to_png_depth(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            Cow::Owned(DynamicImage::ImageRgba16(img.to_rgba16()))
        }
        _ => Cow::Borrowed(img),
    }
}

/// Encode into the target format. There is no fallback format: a failure
/// here is a failure of the whole render.
fn encode(img: &DynamicImage, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Cursor::new(Vec::new());

    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
            rgb.write_with_encoder(encoder)
        }
        OutputFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
            to_png_depth(img).write_with_encoder(encoder)
        }
        OutputFormat::WebP => to_8bit(img).write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
        OutputFormat::Gif => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Gif)
        }
        OutputFormat::Tiff => to_8bit(img).write_to(&mut buf, ImageFormat::Tiff),
        OutputFormat::Bmp => to_8bit(img).write_to(&mut buf, ImageFormat::Bmp),
    };

    result.map_err(|e| BackendError::Encode(format!("{format:?} encode failed: {e}")))?;
    Ok(buf.into_inner())
}

impl ImageBackend for RustBackend {
    fn identify(&self, data: &[u8]) -> Result<ImageSize, BackendError> {
        let (width, height) = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| BackendError::CorruptSource(format!("Failed to read dimensions: {e}")))?;
        Ok(ImageSize { width, height })
    }

    fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
        let img = orientation::correct(decode(params.source)?, params.orientation);
        let plan = calculations::plan((img.width(), img.height()), &params.target);
        let img = transform(img, &plan);
        encode(&img, params.format, params.quality)
    }
}
