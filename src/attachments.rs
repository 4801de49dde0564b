//! Attachment store: originals on disk, their records in the catalog.
//!
//! An attachment's bytes are written once, at ingest, and never change. The
//! MIME type is fixed at the same time. Orientation and the EXIF attribute map
//! can be (re)populated later from the stored bytes.

use crate::catalog::{AttachmentRecord, Catalog, CatalogError};
use crate::config::Config;
use crate::exif::{ExifAttributes, ExifReader, orientation_of};
use crate::imaging::OutputFormat;
use crate::storage::{ShardedTree, StorageError};
use log::{debug, info, warn};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// MIME type recorded when neither the caller nor sniffing can name one.
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("Attachment {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// What [`AttachmentStore::delete`] removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deleted {
    pub attachment: AttachmentRecord,
    /// Derivative rows that went with it.
    pub derivatives: usize,
    /// Files actually found and unlinked (source plus derivatives).
    pub files_removed: usize,
}

pub struct AttachmentStore {
    catalog: Arc<Catalog>,
    tree: ShardedTree,
    /// Derivative blobs are unlinked here on delete.
    derivative_tree: ShardedTree,
    exif: Box<dyn ExifReader>,
}

impl AttachmentStore {
    pub fn new(catalog: Arc<Catalog>, config: &Config, exif: Box<dyn ExifReader>) -> Self {
        Self {
            catalog,
            tree: ShardedTree::new(&config.attachments_path),
            derivative_tree: ShardedTree::new(&config.derivatives_path),
            exif,
        }
    }

    pub fn tree(&self) -> &ShardedTree {
        &self.tree
    }

    pub fn get(&self, id: i64) -> Result<AttachmentRecord, AttachmentError> {
        self.catalog
            .attachment(id)?
            .ok_or(AttachmentError::NotFound(id))
    }

    pub fn list(&self) -> Result<Vec<AttachmentRecord>, AttachmentError> {
        Ok(self.catalog.attachments()?)
    }

    pub fn get_mime_type(&self, id: i64) -> Result<String, AttachmentError> {
        Ok(self.get(id)?.mime_type)
    }

    pub fn get_orientation(&self, id: i64) -> Result<Option<i64>, AttachmentError> {
        Ok(self.get(id)?.orientation)
    }

    pub fn storage_path(&self, id: i64) -> Result<PathBuf, AttachmentError> {
        let record = self.get(id)?;
        Ok(self.tree.path_for(record.id, &record.mime_type)?)
    }

    /// Stored bytes of the original.
    ///
    /// A record whose file has gone missing reads as [`AttachmentError::NotFound`].
    pub fn read_bytes(&self, id: i64) -> Result<Vec<u8>, AttachmentError> {
        let record = self.get(id)?;
        match self.tree.read(record.id, &record.mime_type) {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Attachment {id} has a record but no file");
                Err(AttachmentError::NotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn attributes(&self, id: i64) -> Result<ExifAttributes, AttachmentError> {
        self.get(id)?;
        Ok(self.catalog.attributes(id)?)
    }

    /// Store a new original and read its EXIF.
    ///
    /// `mime_type` is sniffed from the bytes when not given. The record is
    /// removed again if the file can't be written.
    pub fn ingest(
        &self,
        data: &[u8],
        mime_type: Option<&str>,
    ) -> Result<AttachmentRecord, AttachmentError> {
        let mime_type = match mime_type {
            Some(mime) => mime.to_string(),
            None => OutputFormat::sniff(data)
                .map(|f| f.mime_type())
                .unwrap_or(UNKNOWN_MIME_TYPE)
                .to_string(),
        };

        let record = self.catalog.insert_attachment(&mime_type, None)?;
        let path = match self.tree.write_atomic(record.id, &mime_type, data) {
            Ok(path) => path,
            Err(e) => {
                if let Err(cleanup) = self.catalog.delete_attachment(record.id) {
                    warn!("Could not roll back attachment {}: {cleanup}", record.id);
                }
                return Err(e.into());
            }
        };
        info!(
            "Ingested attachment {} ({mime_type}, {} bytes) at {}",
            record.id,
            data.len(),
            path.display()
        );

        let attributes = self.exif.read(data);
        self.populate_attributes(record.id, &attributes)
    }

    /// Replace an attachment's attribute map and derive its orientation from it.
    pub fn populate_attributes(
        &self,
        id: i64,
        attributes: &ExifAttributes,
    ) -> Result<AttachmentRecord, AttachmentError> {
        let mut record = self.get(id)?;
        let orientation = orientation_of(attributes);

        self.catalog.replace_attributes(id, attributes)?;
        self.catalog.set_orientation(id, orientation)?;
        debug!(
            "Attachment {id}: {} attributes, orientation {orientation:?}",
            attributes.len()
        );

        record.orientation = orientation;
        Ok(record)
    }

    /// Re-read EXIF from the stored file.
    pub fn refresh_attributes(&self, id: i64) -> Result<AttachmentRecord, AttachmentError> {
        let bytes = self.read_bytes(id)?;
        let attributes = self.exif.read(&bytes);
        self.populate_attributes(id, &attributes)
    }

    /// Remove an attachment, its derivatives, and all of their files.
    ///
    /// Files go first: a crash midway leaves records pointing at missing
    /// files, which the derivative store heals, rather than files no record
    /// points at.
    pub fn delete(&self, id: i64) -> Result<Deleted, AttachmentError> {
        let attachment = self.get(id)?;
        let derivatives = self.catalog.derivatives_for(id)?;

        let mut files_removed = 0;
        for derivative in &derivatives {
            if self
                .derivative_tree
                .remove(derivative.id, &derivative.mime_type)?
            {
                files_removed += 1;
            }
        }
        if self.tree.remove(attachment.id, &attachment.mime_type)? {
            files_removed += 1;
        }

        self.catalog.delete_attachment(id)?;
        info!(
            "Deleted attachment {id} with {} derivatives",
            derivatives.len()
        );

        Ok(Deleted {
            attachment,
            derivatives: derivatives.len(),
            files_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::Dimensions;
    use crate::exif::{KamadakExif, ORIENTATION_KEY};
    use crate::test_helpers::{jpeg_with_orientation, quadrant_png};
    use tempfile::TempDir;

    /// Returns the same attributes for every image.
    struct FixedExif(ExifAttributes);

    impl ExifReader for FixedExif {
        fn read(&self, _data: &[u8]) -> ExifAttributes {
            self.0.clone()
        }
    }

    fn store_with(exif: Box<dyn ExifReader>) -> (TempDir, Arc<Catalog>, AttachmentStore) {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            attachments_path: tmp.path().join("a"),
            derivatives_path: tmp.path().join("d"),
            ..Config::default()
        };
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let store = AttachmentStore::new(catalog.clone(), &config, exif);
        (tmp, catalog, store)
    }

    fn store() -> (TempDir, Arc<Catalog>, AttachmentStore) {
        store_with(Box::new(KamadakExif))
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    #[test]
    fn ingest_writes_sharded_file() {
        let (tmp, _catalog, store) = store();
        let png = quadrant_png();

        let record = store.ingest(&png, None).unwrap();

        assert_eq!(record.mime_type, "image/png");
        let expected = tmp.path().join(format!("a/0/0/{}.png", record.id));
        assert_eq!(store.storage_path(record.id).unwrap(), expected);
        assert_eq!(store.read_bytes(record.id).unwrap(), png);
    }

    #[test]
    fn ingest_respects_given_mime_type() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(b"%PDF-1.7", Some("application/pdf")).unwrap();
        assert_eq!(store.get_mime_type(record.id).unwrap(), "application/pdf");
        assert!(store.storage_path(record.id).unwrap().ends_with("1.dat"));
    }

    #[test]
    fn ingest_unknown_bytes_fall_back() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(b"????", None).unwrap();
        assert_eq!(record.mime_type, UNKNOWN_MIME_TYPE);
    }

    #[test]
    fn ingest_reads_orientation() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(&jpeg_with_orientation(6), None).unwrap();
        assert_eq!(record.orientation, Some(6));
        assert_eq!(store.get_orientation(record.id).unwrap(), Some(6));
        assert_eq!(
            store.attributes(record.id).unwrap().get(ORIENTATION_KEY).map(String::as_str),
            Some("6")
        );
    }

    #[test]
    fn ingest_without_exif_has_no_orientation() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(&quadrant_png(), None).unwrap();
        assert_eq!(record.orientation, None);
        assert!(store.attributes(record.id).unwrap().is_empty());
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    #[test]
    fn populate_attributes_replaces_orientation() {
        let attrs = ExifAttributes::from([
            (ORIENTATION_KEY.to_string(), "8".to_string()),
            ("Make".to_string(), "Canon".to_string()),
        ]);
        let (_tmp, _catalog, store) = store_with(Box::new(FixedExif(attrs)));

        let record = store.ingest(&quadrant_png(), None).unwrap();
        assert_eq!(record.orientation, Some(8));

        let record = store
            .populate_attributes(record.id, &ExifAttributes::new())
            .unwrap();
        assert_eq!(record.orientation, None);
        assert_eq!(store.get_orientation(record.id).unwrap(), None);
    }

    #[test]
    fn refresh_attributes_rereads_stored_file() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(&jpeg_with_orientation(3), None).unwrap();
        store
            .populate_attributes(record.id, &ExifAttributes::new())
            .unwrap();

        let refreshed = store.refresh_attributes(record.id).unwrap();
        assert_eq!(refreshed.orientation, Some(3));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_tmp, _catalog, store) = store();
        assert!(matches!(store.get(42), Err(AttachmentError::NotFound(42))));
        assert!(matches!(store.read_bytes(42), Err(AttachmentError::NotFound(42))));
        assert!(matches!(
            store.populate_attributes(42, &ExifAttributes::new()),
            Err(AttachmentError::NotFound(42))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(&quadrant_png(), None).unwrap();
        std::fs::remove_file(store.storage_path(record.id).unwrap()).unwrap();
        assert!(matches!(
            store.read_bytes(record.id),
            Err(AttachmentError::NotFound(_))
        ));
    }

    // =========================================================================
    // Delete
    // =========================================================================

    #[test]
    fn delete_removes_files_and_rows() {
        let (tmp, catalog, store) = store();
        let record = store.ingest(&quadrant_png(), None).unwrap();
        let derivative = catalog
            .insert_derivative(record.id, &Dimensions::fill(300, 300), "image/png")
            .unwrap();
        let derivative_tree = ShardedTree::new(tmp.path().join("d"));
        let derivative_path = derivative_tree
            .write_atomic(derivative.id, "image/png", b"rendered")
            .unwrap();
        let source_path = store.storage_path(record.id).unwrap();

        let deleted = store.delete(record.id).unwrap();

        assert_eq!(deleted.derivatives, 1);
        assert_eq!(deleted.files_removed, 2);
        assert!(!source_path.exists());
        assert!(!derivative_path.exists());
        assert!(catalog.derivative(derivative.id).unwrap().is_none());
        assert!(matches!(store.get(record.id), Err(AttachmentError::NotFound(_))));
    }

    #[test]
    fn delete_tolerates_missing_files() {
        let (_tmp, _catalog, store) = store();
        let record = store.ingest(&quadrant_png(), None).unwrap();
        std::fs::remove_file(store.storage_path(record.id).unwrap()).unwrap();

        let deleted = store.delete(record.id).unwrap();
        assert_eq!(deleted.files_removed, 0);
    }
}
