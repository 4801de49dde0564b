//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: identify and render.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the [`MockBackend`](tests::MockBackend) below.

use super::params::RenderParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// The source bytes could not be decoded. Retrying won't help.
    #[error("Corrupt source image: {0}")]
    CorruptSource(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Send + Sync` so one backend can be shared across rayon workers.
pub trait ImageBackend: Send + Sync {
    /// Pixel size of the encoded image, as stored (before orientation).
    fn identify(&self, data: &[u8]) -> Result<ImageSize, BackendError>;

    /// Decode, orient, crop/resize and re-encode. Returns the encoded bytes.
    fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dimensions::Dimensions;
    use crate::imaging::params::{OutputFormat, Quality};
    use std::sync::{Arc, Mutex};

    /// Mock backend that records operations without executing them.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub identify_results: Mutex<Vec<ImageSize>>,
        pub render_output: Mutex<Vec<u8>>,
        pub fail_render: Mutex<Option<String>>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(usize),
        Render {
            source_len: usize,
            orientation: Option<i64>,
            target: Dimensions,
            format: OutputFormat,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_sizes(sizes: Vec<ImageSize>) -> Self {
            Self {
                identify_results: Mutex::new(sizes),
                ..Self::default()
            }
        }

        /// Every render returns `bytes`.
        pub fn rendering(bytes: &[u8]) -> Self {
            Self {
                render_output: Mutex::new(bytes.to_vec()),
                ..Self::default()
            }
        }

        /// Every render fails as if the source were corrupt.
        pub fn corrupt(reason: &str) -> Self {
            Self {
                fail_render: Mutex::new(Some(reason.to_string())),
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn render_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Render { .. }))
                .count()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, data: &[u8]) -> Result<ImageSize, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(data.len()));

            self.identify_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::CorruptSource("No mock size".to_string()))
        }

        fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Render {
                source_len: params.source.len(),
                orientation: params.orientation,
                target: params.target,
                format: params.format,
                quality: params.quality.value(),
            });

            if let Some(reason) = self.fail_render.lock().unwrap().clone() {
                return Err(BackendError::CorruptSource(reason));
            }
            Ok(self.render_output.lock().unwrap().clone())
        }
    }

    /// Lets a test keep a handle on the mock after boxing it.
    impl ImageBackend for Arc<MockBackend> {
        fn identify(&self, data: &[u8]) -> Result<ImageSize, BackendError> {
            self.as_ref().identify(data)
        }

        fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
            self.as_ref().render(params)
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_sizes(vec![ImageSize {
            width: 800,
            height: 600,
        }]);

        let result = backend.identify(b"1234").unwrap();
        assert_eq!(result.width, 800);
        assert_eq!(result.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops, vec![RecordedOp::Identify(4)]);
    }

    #[test]
    fn mock_identify_without_sizes_errors() {
        let backend = MockBackend::new();
        assert!(matches!(
            backend.identify(b""),
            Err(BackendError::CorruptSource(_))
        ));
    }

    #[test]
    fn mock_records_render() {
        let backend = MockBackend::rendering(b"encoded");

        let out = backend
            .render(&RenderParams {
                source: b"source",
                orientation: Some(6),
                target: Dimensions::fill(300, 300),
                format: OutputFormat::Jpeg,
                quality: Quality::new(85),
            })
            .unwrap();

        assert_eq!(out, b"encoded");
        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            RecordedOp::Render {
                source_len: 6,
                orientation: Some(6),
                quality: 85,
                format: OutputFormat::Jpeg,
                ..
            }
        ));
    }

    #[test]
    fn mock_corrupt_still_records() {
        let backend = MockBackend::corrupt("truncated");
        let result = backend.render(&RenderParams {
            source: b"",
            orientation: None,
            target: Dimensions::FULL,
            format: OutputFormat::Png,
            quality: Quality::default(),
        });
        assert!(matches!(result, Err(BackendError::CorruptSource(r)) if r == "truncated"));
        assert_eq!(backend.render_count(), 1);
    }
}
