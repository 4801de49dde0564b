//! Pure geometry for derivatives: crop window and output size.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! Scales are ratios of *new* to *old* size (`< 1.0` means reduction).
//! Intermediate values stay `f64`; rounding happens once, when the crop
//! rectangle and output size are built, so errors don't stack.

use crate::dimensions::Dimensions;
use serde::Serialize;

/// Source-space crop window, as left/top/right/bottom pixel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRect {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// What to do to an (already oriented) source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Crop applied before the resize, if any.
    pub crop: Option<CropRect>,
    /// Final output size.
    pub output: (u32, u32),
}

impl Plan {
    /// True when the plan leaves the source untouched.
    pub fn is_identity(&self, source: (u32, u32)) -> bool {
        self.crop.is_none() && self.output == source
    }
}

/// Round half to even, then clamp into `1..=u32::MAX`.
fn to_px(value: f64) -> u32 {
    let rounded = value.round_ties_even();
    if rounded < 1.0 {
        1
    } else if rounded > u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Like [`to_px`] but allows 0, for crop offsets.
fn to_offset(value: f64) -> u32 {
    value.round_ties_even().max(0.0) as u32
}

/// Plan the crop and resize that turn a `source`-sized image into `target`.
///
/// | Width | Height | Crop | Result |
/// |---|---|---|---|
/// | yes | yes | yes | center crop to target aspect, output exactly `(w, h)` |
/// | yes | yes | no | shrink to fit inside `(w, h)`, aspect preserved |
/// | yes | no | – | output width `w`, height follows |
/// | no | yes | – | output height `h`, width follows |
/// | no | no | – | unchanged |
pub fn plan(source: (u32, u32), target: &Dimensions) -> Plan {
    let (old_w, old_h) = (source.0 as f64, source.1 as f64);

    match (target.width, target.height) {
        (Some(new_w), Some(new_h)) => {
            let (new_w_f, new_h_f) = (new_w as f64, new_h as f64);
            let scale_w = new_w_f / old_w;
            let scale_h = new_h_f / old_h;

            if target.allow_crop {
                // Larger ratio fills the box on both axes; the other axis overflows
                let scale = scale_w.max(scale_h);
                let window_w = new_w_f / scale;
                let window_h = new_h_f / scale;
                // One of these is always zero
                let cut_l = (old_w - window_w) / 2.0;
                let cut_t = (old_h - window_h) / 2.0;

                let left = to_offset(cut_l);
                let top = to_offset(cut_t);
                let right = to_px(window_w + cut_l).clamp(left + 1, source.0.max(left + 1));
                let bottom = to_px(window_h + cut_t).clamp(top + 1, source.1.max(top + 1));

                Plan {
                    crop: Some(CropRect {
                        left,
                        top,
                        right,
                        bottom,
                    }),
                    output: (new_w, new_h),
                }
            } else {
                // Smaller ratio keeps the whole image inside the box
                let scale = scale_w.min(scale_h);
                Plan {
                    crop: None,
                    output: (to_px(old_w * scale), to_px(old_h * scale)),
                }
            }
        }
        (Some(new_w), None) => {
            let scale = new_w as f64 / old_w;
            Plan {
                crop: None,
                output: (new_w, to_px(old_h * scale)),
            }
        }
        (None, Some(new_h)) => {
            let scale = new_h as f64 / old_h;
            Plan {
                crop: None,
                output: (to_px(old_w * scale), new_h),
            }
        }
        (None, None) => Plan {
            crop: None,
            output: source,
        },
    }
}
