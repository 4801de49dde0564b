//! Consistency check between the catalog and the two sharded trees.
//!
//! The stores never leave a file without a record on purpose, but crashes,
//! manual edits and restored backups can. An audit walks both trees and
//! compares what is on disk with what the catalog expects:
//!
//! - **orphan**: a file the catalog has no record for (or a leftover temp file)
//! - **missing**: a record whose file is gone
//!
//! Missing derivatives are harmless: the next request re-renders them. Missing
//! attachments are not recoverable and are only reported.

use crate::catalog::{Catalog, CatalogError};
use crate::storage::{ShardedTree, StorageError, parse_leaf_name};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

/// Temp files younger than this may still be written by another process.
const TEMP_FILE_GRACE: Duration = Duration::from_secs(10 * 60);

#[derive(Error, Debug)]
pub enum AuditError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to walk tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A file on disk that no record points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub path: PathBuf,
    /// Id parsed from the file name, if it looks like a leaf.
    pub id: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TreeReport {
    /// Regular files seen in the tree.
    pub files: usize,
    pub orphans: Vec<Orphan>,
    /// Record ids whose file is missing.
    pub missing: Vec<i64>,
}

impl TreeReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub attachments: TreeReport,
    pub derivatives: TreeReport,
    /// Orphan files deleted during this audit.
    pub removed: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.attachments.is_clean() && self.derivatives.is_clean()
    }
}

/// Compare both trees against the catalog, optionally deleting orphans.
pub fn audit(
    catalog: &Catalog,
    attachments: &ShardedTree,
    derivatives: &ShardedTree,
    remove_orphans: bool,
) -> Result<AuditReport, AuditError> {
    let attachment_keys = catalog
        .attachments()?
        .into_iter()
        .map(|a| (a.id, a.mime_type))
        .collect::<Vec<_>>();
    let derivative_keys = catalog
        .all_derivatives()?
        .into_iter()
        .map(|d| (d.id, d.mime_type))
        .collect::<Vec<_>>();

    let mut report = AuditReport {
        attachments: audit_tree(attachments, &attachment_keys)?,
        derivatives: audit_tree(derivatives, &derivative_keys)?,
        removed: 0,
    };

    if remove_orphans {
        let orphans = report
            .attachments
            .orphans
            .iter()
            .chain(&report.derivatives.orphans);
        for orphan in orphans {
            if is_in_flight(&orphan.path) {
                debug!("Skipping in-flight temp file {}", orphan.path.display());
                continue;
            }
            match std::fs::remove_file(&orphan.path) {
                Ok(()) => {
                    info!("Removed orphan {}", orphan.path.display());
                    report.removed += 1;
                }
                Err(e) => warn!("Could not remove {}: {e}", orphan.path.display()),
            }
        }
    }

    Ok(report)
}

/// A recent `.tmp*` file is an atomic write that has not been persisted yet.
fn is_in_flight(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(".tmp"));
    if !is_temp {
        return false;
    }
    let age = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default());
    match age {
        Ok(age) => age < TEMP_FILE_GRACE,
        Err(_) => false,
    }
}

fn audit_tree(tree: &ShardedTree, keys: &[(i64, String)]) -> Result<TreeReport, AuditError> {
    let mut report = TreeReport::default();

    let mut expected = HashSet::with_capacity(keys.len());
    for (id, mime_type) in keys {
        let path = tree.path_for(*id, mime_type)?;
        if !path.is_file() {
            report.missing.push(*id);
        }
        expected.insert(path);
    }

    if !tree.base_dir().is_dir() {
        debug!("{} does not exist yet", tree.base_dir().display());
        return Ok(report);
    }

    for entry in WalkDir::new(tree.base_dir()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        report.files += 1;

        let path = entry.into_path();
        if expected.contains(&path) {
            continue;
        }
        let id = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_leaf_name);
        report.orphans.push(Orphan { path, id });
    }

    Ok(report)
}
