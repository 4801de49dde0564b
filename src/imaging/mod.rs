//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Orient** | EXIF code → rotate/flip |
//! | **Crop + resize** | `crop_imm` + Lanczos3 `resize_exact` |
//! | **Encode** | source format, per-format options |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for crop/resize geometry (unit testable)
//! - **Orientation**: EXIF orientation codes and their pixel transforms
//! - **Parameters**: Data structures describing a render
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
pub mod calculations;
pub mod orientation;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, ImageSize};
pub use calculations::{CropRect, Plan, plan};
pub use orientation::Orientation;
pub use params::{OutputFormat, Quality, RenderParams};
pub use rust_backend::RustBackend;
