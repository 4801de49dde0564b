//! EXIF orientation correction.
//!
//! Cameras store pixels in sensor order and record how the picture should be
//! displayed in the EXIF `Orientation` tag. Derivatives bake that transform
//! into the pixels so every consumer sees the picture upright.
//!
//! | Code | Transform |
//! |---|---|
//! | 1 | none |
//! | 2 | flip horizontal |
//! | 3 | rotate 180° |
//! | 4 | flip vertical |
//! | 5 | transpose (mirror across the top-left/bottom-right diagonal) |
//! | 6 | rotate 90° clockwise |
//! | 7 | transverse (mirror across the top-right/bottom-left diagonal) |
//! | 8 | rotate 90° counter-clockwise |
//!
//! Absent or out-of-range codes are treated as code 1.

use image::DynamicImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map a raw EXIF code. Never fails.
    pub fn from_exif(code: Option<i64>) -> Self {
        match code {
            Some(2) => Self::FlipHorizontal,
            Some(3) => Self::Rotate180,
            Some(4) => Self::FlipVertical,
            Some(5) => Self::Transpose,
            Some(6) => Self::Rotate90,
            Some(7) => Self::Transverse,
            Some(8) => Self::Rotate270,
            _ => Self::Normal,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Rotate90 | Self::Transverse | Self::Rotate270
        )
    }

    /// Size of the image after correction.
    pub fn oriented_size(self, (width, height): (u32, u32)) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Apply the transform. `Normal` hands the image back untouched.
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::FlipHorizontal => img.fliph(),
            Self::Rotate180 => img.rotate180(),
            Self::FlipVertical => img.flipv(),
            Self::Transpose => img.rotate90().fliph(),
            Self::Rotate90 => img.rotate90(),
            Self::Transverse => img.rotate270().fliph(),
            Self::Rotate270 => img.rotate270(),
        }
    }
}

/// Correct `img` for a raw EXIF orientation code.
pub fn correct(img: DynamicImage, code: Option<i64>) -> DynamicImage {
    Orientation::from_exif(code).apply(img)
}
