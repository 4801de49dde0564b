//! Shared test utilities for the shardpix test suite.
//!
//! Provides the four-quadrant fixture image, pixel assertions that survive
//! lossy encoding, and a throwaway store environment.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let env = TestEnv::new();
//! let attachment = env.attachments.ingest(&quadrant_png(), None).unwrap();
//! let derivative = env.derivatives.get_or_create(attachment.id, Dimensions::FULL).unwrap();
//!
//! let img = image::open(&derivative.path).unwrap();
//! assert_eq!(corners(&img), [RED, GREEN, BLUE, BLACK]);
//! ```

use crate::attachments::AttachmentStore;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::derivatives::DerivativeStore;
use crate::exif::KamadakExif;
use crate::imaging::RustBackend;
use image::{DynamicImage, ImageEncoder, Rgb, RgbImage};
use std::sync::Arc;
use tempfile::TempDir;

// =========================================================================
// Four-quadrant fixture
// =========================================================================

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// 100×76 image split into four solid quadrants:
///
/// ```text
/// ┌──────┬───────┐
/// │ red  │ green │
/// ├──────┼───────┤
/// │ blue │ black │
/// └──────┴───────┘
/// ```
pub fn quadrant_image() -> DynamicImage {
    let img = RgbImage::from_fn(100, 76, |x, y| {
        let color = match (x < 50, y < 38) {
            (true, true) => RED,
            (false, true) => GREEN,
            (true, false) => BLUE,
            (false, false) => BLACK,
        };
        Rgb(color)
    });
    DynamicImage::ImageRgb8(img)
}

pub fn quadrant_png() -> Vec<u8> {
    encode(image::ImageFormat::Png)
}

pub fn quadrant_jpeg() -> Vec<u8> {
    let img = quadrant_image().to_rgb8();
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 95)
        .write_image(img.as_raw(), 100, 76, image::ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

fn encode(format: image::ImageFormat) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    quadrant_image().write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// The quadrant JPEG with an EXIF APP1 segment holding only `Orientation`.
pub fn jpeg_with_orientation(code: u16) -> Vec<u8> {
    // Big-endian TIFF header, one IFD entry: tag 0x0112, SHORT, count 1
    let mut tiff = vec![b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08];
    tiff.extend_from_slice(&[0x00, 0x01]);
    tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
    tiff.extend_from_slice(&code.to_be_bytes());
    tiff.extend_from_slice(&[0x00, 0x00]);
    tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

    let mut app1 = b"Exif\0\0".to_vec();
    app1.extend_from_slice(&tiff);
    let len = (app1.len() + 2) as u16;

    let jpeg = quadrant_jpeg();
    let mut out = jpeg[..2].to_vec(); // SOI
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&app1);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// =========================================================================
// Pixel assertions
// =========================================================================

/// Snap each channel to 0 or 255 so lossy codecs still compare equal.
fn snap(pixel: Rgb<u8>) -> [u8; 3] {
    pixel.0.map(|c| if c > 127 { 255 } else { 0 })
}

/// Corner colors: top-left, top-right, bottom-left, bottom-right.
pub fn corners(img: &DynamicImage) -> [[u8; 3]; 4] {
    let rgb = img.to_rgb8();
    let (right, bottom) = (rgb.width() - 1, rgb.height() - 1);
    [
        snap(*rgb.get_pixel(0, 0)),
        snap(*rgb.get_pixel(right, 0)),
        snap(*rgb.get_pixel(0, bottom)),
        snap(*rgb.get_pixel(right, bottom)),
    ]
}

// =========================================================================
// Store environment
// =========================================================================

/// Stores wired to a fresh temp directory and an in-memory catalog.
pub struct TestEnv {
    pub _dir: TempDir,
    pub config: Config,
    pub attachments: Arc<AttachmentStore>,
    pub derivatives: DerivativeStore,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build with a tweaked stock config.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database_path = dir.path().join("catalog.db");
        config.attachments_path = dir.path().join("attachments");
        config.derivatives_path = dir.path().join("derivatives");
        adjust(&mut config);

        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let attachments = Arc::new(AttachmentStore::new(
            catalog.clone(),
            &config,
            Box::new(KamadakExif),
        ));
        let derivatives = DerivativeStore::new(
            catalog,
            attachments.clone(),
            Box::new(RustBackend::new()),
            &config,
        );

        Self {
            _dir: dir,
            config,
            attachments,
            derivatives,
        }
    }
}
