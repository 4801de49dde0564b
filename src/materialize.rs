//! Derivative materialization: source bytes in, derivative file out.
//!
//! ```text
//! attachment bytes ──► backend.render ──► write_atomic ──► derivatives/d1/d2/<id><ext>
//!                     (orient, plan, crop, resize, encode)
//! ```
//!
//! The output format is always the source's format. A source we can't encode
//! back is an [`Encode`](DerivativeError::Encode) error; there is no fallback
//! format.

use crate::attachments::AttachmentStore;
use crate::catalog::{AttachmentRecord, DerivativeRecord};
use crate::derivatives::DerivativeError;
use crate::dimensions::Dimensions;
use crate::imaging::{
    BackendError, ImageBackend, Orientation, OutputFormat, Plan, Quality, RenderParams, plan,
};
use crate::storage::{ShardedTree, StorageError};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Materializer {
    tree: ShardedTree,
    backend: Box<dyn ImageBackend>,
    quality: Quality,
    attachments: Arc<AttachmentStore>,
}

impl Materializer {
    pub fn new(
        tree: ShardedTree,
        backend: Box<dyn ImageBackend>,
        quality: Quality,
        attachments: Arc<AttachmentStore>,
    ) -> Self {
        Self {
            tree,
            backend,
            quality,
            attachments,
        }
    }

    pub fn tree(&self) -> &ShardedTree {
        &self.tree
    }

    pub fn path_for(&self, derivative: &DerivativeRecord) -> Result<PathBuf, DerivativeError> {
        Ok(self.tree.path_for(derivative.id, &derivative.mime_type)?)
    }

    pub fn is_materialized(&self, derivative: &DerivativeRecord) -> Result<bool, DerivativeError> {
        Ok(self.tree.exists(derivative.id, &derivative.mime_type)?)
    }

    /// Render `derivative` from `attachment` and write it, replacing any
    /// existing file. Returns the encoded bytes.
    pub fn materialize(
        &self,
        derivative: &DerivativeRecord,
        attachment: &AttachmentRecord,
    ) -> Result<Vec<u8>, DerivativeError> {
        let source = self.attachments.read_bytes(attachment.id)?;
        let format = OutputFormat::from_mime(&attachment.mime_type).ok_or_else(|| {
            DerivativeError::Encode(format!(
                "Cannot produce derivatives of {} (attachment {})",
                attachment.mime_type, attachment.id
            ))
        })?;

        let params = RenderParams {
            source: &source,
            orientation: attachment.orientation,
            target: derivative.dimensions,
            format,
            quality: self.quality,
        };
        let encoded = self
            .backend
            .render(&params)
            .map_err(|e| map_backend_error(e, attachment.id))?;

        let path = self
            .tree
            .write_atomic(derivative.id, &derivative.mime_type, &encoded)?;
        info!(
            "Materialized {} of attachment {} → {} ({} bytes)",
            derivative.dimensions,
            attachment.id,
            path.display(),
            encoded.len()
        );
        Ok(encoded)
    }

    /// The crop and output size `dims` would produce, read from the source
    /// header without decoding pixels.
    pub fn plan_for(
        &self,
        attachment: &AttachmentRecord,
        dims: &Dimensions,
    ) -> Result<Plan, DerivativeError> {
        let source = self.attachments.read_bytes(attachment.id)?;
        let size = self
            .backend
            .identify(&source)
            .map_err(|e| map_backend_error(e, attachment.id))?;
        let oriented = Orientation::from_exif(attachment.orientation)
            .oriented_size((size.width, size.height));
        Ok(plan(oriented, dims))
    }

    /// Materialize only if the file is missing. Returns whether it wrote.
    pub fn ensure(
        &self,
        derivative: &DerivativeRecord,
        attachment: &AttachmentRecord,
    ) -> Result<bool, DerivativeError> {
        if self.is_materialized(derivative)? {
            debug!("Derivative {} already on disk", derivative.id);
            return Ok(false);
        }
        self.materialize(derivative, attachment)?;
        Ok(true)
    }
}

fn map_backend_error(err: BackendError, attachment_id: i64) -> DerivativeError {
    match err {
        BackendError::CorruptSource(reason) => DerivativeError::CorruptSource {
            id: attachment_id,
            reason,
        },
        BackendError::Encode(reason) => DerivativeError::Encode(reason),
        BackendError::Io(e) => DerivativeError::Storage(StorageError::Io(e)),
    }
}
