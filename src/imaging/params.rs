//! Parameter types for image operations.
//!
//! These structs describe *what* to render, not *how*. They are the interface
//! between the [`materialize`](crate::materialize) module (which decides what
//! derivative is needed) and the [`backend`](super::backend) (which does the
//! pixel work), so a mock backend can stand in during tests.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: The closed set of formats a derivative can be written in.
//! - [`RenderParams`]: Everything needed to turn source bytes into derivative bytes.

use crate::dimensions::Dimensions;
use image::ImageFormat;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Output encodings. A derivative is always written in its source's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy, uses the configured [`Quality`].
    Jpeg,
    /// Best compression, adaptive filtering.
    Png,
    Gif,
    /// Lossless.
    WebP,
    Tiff,
    Bmp,
}

impl OutputFormat {
    /// Map a MIME type to a format, or `None` if we can't encode it.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "image/tiff" => Some(Self::Tiff),
            "image/bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Guess the format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::WebP),
            ImageFormat::Tiff => Some(Self::Tiff),
            ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
        }
    }
}

/// Full description of one derivative render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams<'a> {
    /// Encoded source image.
    pub source: &'a [u8],
    /// Raw EXIF orientation code of the source, if known.
    pub orientation: Option<i64>,
    pub target: Dimensions,
    pub format: OutputFormat,
    pub quality: Quality,
}
