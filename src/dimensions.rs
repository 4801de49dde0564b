//! Derivative dimensions and the canned-size whitelist.
//!
//! A [`Dimensions`] value is the cache key for a derivative: optional width,
//! optional height, and whether cropping is allowed. Clients refer to it by a
//! compact path segment:
//!
//! | Segment | Width | Height | Crop |
//! |---|---|---|---|
//! | `300x300.jpg` | 300 | 300 | yes |
//! | `960~720.jpg` | 960 | 720 | no |
//! | `20~` | 20 | – | no |
//! | `~30.png` | – | 30 | no |
//! | `full.jpg` | – | – | no |
//!
//! The trailing extension is cosmetic (some link-preview services want to see
//! one) and is ignored by the decoder.
//!
//! Only triples listed in [`CannedDimensions`] may ever be materialized.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Path-segment flag: the client accepts a cropped image.
pub const CROP_FLAG_ALLOW: char = 'x';

/// Path-segment flag: the client wants the whole image, shrunk to fit.
pub const CROP_FLAG_DISALLOW: char = '~';

const FULL_TOKEN: &str = "full";

/// Target size of a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub allow_crop: bool,
}

impl Dimensions {
    /// The original size: no resize, no crop.
    pub const FULL: Dimensions = Dimensions {
        width: None,
        height: None,
        allow_crop: false,
    };

    pub fn new(width: Option<u32>, height: Option<u32>, allow_crop: bool) -> Self {
        Self {
            width,
            height,
            allow_crop,
        }
    }

    /// Both sides given, crop to fill.
    pub fn fill(width: u32, height: u32) -> Self {
        Self::new(Some(width), Some(height), true)
    }

    /// Both sides given, shrink to fit.
    pub fn fit(width: u32, height: u32) -> Self {
        Self::new(Some(width), Some(height), false)
    }

    pub fn is_full(&self) -> bool {
        self.width.is_none() && self.height.is_none() && !self.allow_crop
    }

    /// Decode a path segment like `300x300.jpg` or `full.png`.
    ///
    /// Returns `None` when the segment is malformed, names neither side, or
    /// carries a zero/overflowing size.
    pub fn decode(segment: &str) -> Option<Self> {
        let body = strip_extension(segment);

        if body == FULL_TOKEN {
            return Some(Self::FULL);
        }

        let flag_pos = body.find([CROP_FLAG_ALLOW, CROP_FLAG_DISALLOW])?;
        let allow_crop = body[flag_pos..].starts_with(CROP_FLAG_ALLOW);
        let width = parse_side(&body[..flag_pos])?;
        let height = parse_side(&body[flag_pos + 1..])?;

        if width.is_none() && height.is_none() {
            return None;
        }

        Some(Self::new(width, height, allow_crop))
    }

    /// Encode back to a path segment, appending `extension` (with its dot).
    ///
    /// Inverse of [`Dimensions::decode`].
    pub fn to_path_segment(&self, extension: &str) -> String {
        if self.is_full() {
            return format!("{FULL_TOKEN}{extension}");
        }
        let flag = if self.allow_crop {
            CROP_FLAG_ALLOW
        } else {
            CROP_FLAG_DISALLOW
        };
        let side = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        format!("{}{}{}{}", side(self.width), flag, side(self.height), extension)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_path_segment(""))
    }
}

/// Drop everything from the first dot on. Digits and flags never contain one.
fn strip_extension(segment: &str) -> &str {
    match segment.find('.') {
        Some(pos) => &segment[..pos],
        None => segment,
    }
}

/// `""` → `Some(None)`; digits → `Some(Some(n))`; anything else → `None`.
fn parse_side(raw: &str) -> Option<Option<u32>> {
    if raw.is_empty() {
        return Some(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>().ok().filter(|n| *n > 0).map(Some)
}

/// Named whitelist of the only dimension triples that may be materialized.
///
/// Bounds disk and CPU use: a client can't make the server render arbitrary
/// sizes by editing a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CannedDimensions(BTreeMap<String, Dimensions>);

impl CannedDimensions {
    pub fn new(entries: BTreeMap<String, Dimensions>) -> Self {
        Self(entries)
    }

    /// Look up a triple by human name (`"thumbnail"`).
    pub fn get(&self, name: &str) -> Option<Dimensions> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, dims: &Dimensions) -> bool {
        self.0.values().any(|d| d == dims)
    }

    /// Reverse lookup: the name a triple is registered under.
    pub fn name_of(&self, dims: &Dimensions) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, d)| *d == dims)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Dimensions)> {
        self.0.iter().map(|(name, dims)| (name.as_str(), *dims))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CannedDimensions {
    fn default() -> Self {
        let entries = [
            ("full", Dimensions::FULL),
            ("opengraph", Dimensions::fit(750, 750)),
            ("single", Dimensions::fit(960, 720)),
            ("single2x", Dimensions::fit(1920, 1440)),
            ("thumbnail", Dimensions::fill(300, 300)),
            ("thumbnail2x", Dimensions::fill(600, 600)),
        ];
        Self(
            entries
                .into_iter()
                .map(|(name, dims)| (name.to_string(), dims))
                .collect(),
        )
    }
}
