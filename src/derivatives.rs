//! Derivative store: the get-or-create entry point.
//!
//! Every request walks the same state machine per key
//! `(attachment, width, height, allow_crop)`:
//!
//! ```text
//! Absent ──insert──► Recorded ──materialize──► Materialized
//!                                                  │    ▲
//!                                                  └────┘ file missing: re-render
//! ```
//!
//! Two requests racing on an absent key both try to insert; the unique index
//! lets one win and the loser re-reads the winner's record. Both then render
//! (or find) the same file, and [`write_atomic`](crate::storage::ShardedTree::write_atomic)
//! makes the last rename win with identical bytes.
//!
//! Only whitelisted dimension triples are ever served. A request for anything
//! else is [`NotAllowed`](DerivativeError::NotAllowed), which callers report as
//! "not found" rather than a server error.

use crate::attachments::{AttachmentError, AttachmentStore};
use crate::cache::CacheStats;
use crate::catalog::{AttachmentRecord, Catalog, CatalogError, DerivativeRecord};
use crate::config::Config;
use crate::dimensions::{CannedDimensions, Dimensions};
use crate::imaging::{ImageBackend, Plan};
use crate::materialize::Materializer;
use crate::storage::{ShardedTree, StorageError};
use log::{debug, error, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DerivativeError {
    #[error("Dimensions not allowed: {0}")]
    NotAllowed(String),
    #[error("Attachment {0} not found")]
    SourceNotFound(i64),
    #[error("Attachment {id} is not a decodable image: {reason}")]
    CorruptSource { id: i64, reason: String },
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Storage misconfigured: {0}")]
    Configuration(String),
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl DerivativeError {
    /// Whether the client asked for something that doesn't exist (as opposed
    /// to the server failing to produce something that should).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotAllowed(_) | Self::SourceNotFound(_) | Self::CorruptSource { .. }
        )
    }
}

impl From<StorageError> for DerivativeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Storage(other),
        }
    }
}

impl From<AttachmentError> for DerivativeError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::NotFound(id) => Self::SourceNotFound(id),
            AttachmentError::Storage(e) => e.into(),
            AttachmentError::Catalog(e) => Self::Catalog(e),
        }
    }
}

/// How a derivative request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    /// Record and file were both present.
    Hit,
    /// New record, rendered now.
    Created,
    /// Record was present but the file was missing; rendered again.
    Healed,
}

/// A materialized derivative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Derivative {
    pub record: DerivativeRecord,
    pub path: PathBuf,
    pub lookup: Lookup,
}

pub struct DerivativeStore {
    catalog: Arc<Catalog>,
    attachments: Arc<AttachmentStore>,
    materializer: Materializer,
    canned: CannedDimensions,
}

impl DerivativeStore {
    pub fn new(
        catalog: Arc<Catalog>,
        attachments: Arc<AttachmentStore>,
        backend: Box<dyn ImageBackend>,
        config: &Config,
    ) -> Self {
        let materializer = Materializer::new(
            ShardedTree::new(&config.derivatives_path),
            backend,
            config.quality(),
            attachments.clone(),
        );
        Self {
            catalog,
            attachments,
            materializer,
            canned: config.dimensions.clone(),
        }
    }

    pub fn canned(&self) -> &CannedDimensions {
        &self.canned
    }

    pub fn tree(&self) -> &ShardedTree {
        self.materializer.tree()
    }

    /// Fetch the derivative of `source_id` at `dims`, creating it if needed.
    pub fn get_or_create(
        &self,
        source_id: i64,
        dims: Dimensions,
    ) -> Result<Derivative, DerivativeError> {
        if !self.canned.contains(&dims) {
            return Err(DerivativeError::NotAllowed(dims.to_string()));
        }
        let attachment = self.attachments.get(source_id)?;

        let (record, inserted) = match self.catalog.find_derivative(source_id, &dims)? {
            Some(record) => (record, false),
            None => self.insert_or_reread(&attachment, &dims)?,
        };

        let wrote = self.materializer.ensure(&record, &attachment)?;
        let lookup = match (inserted, wrote) {
            (true, _) => Lookup::Created,
            (false, true) => {
                warn!(
                    "Derivative {} ({dims} of attachment {source_id}) had no file on disk; rendered",
                    record.id
                );
                Lookup::Healed
            }
            (false, false) => {
                debug!("Cache hit: {dims} of attachment {source_id}");
                Lookup::Hit
            }
        };

        let path = self.materializer.path_for(&record)?;
        Ok(Derivative {
            record,
            path,
            lookup,
        })
    }

    /// Same as [`get_or_create`](Self::get_or_create) with dimensions in path
    /// form, e.g. `"300x300.jpg"`.
    pub fn get_or_create_encoded(
        &self,
        source_id: i64,
        segment: &str,
    ) -> Result<Derivative, DerivativeError> {
        let dims = Dimensions::decode(segment)
            .ok_or_else(|| DerivativeError::NotAllowed(segment.to_string()))?;
        self.get_or_create(source_id, dims)
    }

    /// Same as [`get_or_create`](Self::get_or_create) with a canned size name,
    /// e.g. `"thumbnail"`.
    pub fn get_or_create_canned(
        &self,
        source_id: i64,
        name: &str,
    ) -> Result<Derivative, DerivativeError> {
        let dims = self
            .canned
            .get(name)
            .ok_or_else(|| DerivativeError::NotAllowed(name.to_string()))?;
        self.get_or_create(source_id, dims)
    }

    /// What [`get_or_create`](Self::get_or_create) would render, without
    /// rendering or recording anything.
    pub fn plan(&self, source_id: i64, dims: Dimensions) -> Result<Plan, DerivativeError> {
        if !self.canned.contains(&dims) {
            return Err(DerivativeError::NotAllowed(dims.to_string()));
        }
        let attachment = self.attachments.get(source_id)?;
        self.materializer.plan_for(&attachment, &dims)
    }

    /// Recorded derivatives of an attachment, materialized or not.
    pub fn list_for(&self, source_id: i64) -> Result<Vec<DerivativeRecord>, DerivativeError> {
        self.attachments.get(source_id)?;
        Ok(self.catalog.derivatives_for(source_id)?)
    }

    pub fn path_for(&self, record: &DerivativeRecord) -> Result<PathBuf, DerivativeError> {
        self.materializer.path_for(record)
    }

    pub fn is_materialized(&self, record: &DerivativeRecord) -> Result<bool, DerivativeError> {
        self.materializer.is_materialized(record)
    }

    /// Insert a new record, or take the one a concurrent writer just inserted.
    pub(crate) fn insert_or_reread(
        &self,
        attachment: &AttachmentRecord,
        dims: &Dimensions,
    ) -> Result<(DerivativeRecord, bool), DerivativeError> {
        match self
            .catalog
            .insert_derivative(attachment.id, dims, &attachment.mime_type)
        {
            Ok(record) => Ok((record, true)),
            Err(CatalogError::DuplicateKey) => {
                warn!(
                    "Lost insert race for {dims} of attachment {}; using existing record",
                    attachment.id
                );
                let record = self
                    .catalog
                    .find_derivative(attachment.id, dims)?
                    .ok_or(DerivativeError::SourceNotFound(attachment.id))?;
                Ok((record, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Materialize every canned size of every given attachment, in parallel.
    ///
    /// Failures are logged and counted, never fatal to the rest of the run.
    pub fn warm(&self, attachments: &[AttachmentRecord]) -> CacheStats {
        let jobs: Vec<(i64, &str, Dimensions)> = attachments
            .iter()
            .flat_map(|a| self.canned.iter().map(move |(name, dims)| (a.id, name, dims)))
            .collect();

        let outcomes: Vec<Result<Lookup, DerivativeError>> = jobs
            .par_iter()
            .map(|(id, name, dims)| {
                self.get_or_create(*id, *dims)
                    .map(|d| d.lookup)
                    .inspect_err(|e| error!("Attachment {id} {name}: {e}"))
            })
            .collect();

        let mut stats = CacheStats::default();
        for outcome in outcomes {
            match outcome {
                Ok(lookup) => stats.record(lookup),
                Err(_) => stats.fail(),
            }
        }
        stats
    }
}
