//! SQLite catalog of attachments and derivatives.
//!
//! The catalog owns ids and the uniqueness rules; file bytes live outside it,
//! in the sharded trees (see [`storage`](crate::storage)).
//!
//! ## Schema
//!
//! | Table | Holds |
//! |---|---|
//! | `attachment` | one row per stored original: MIME type, EXIF orientation |
//! | `attachment_exif` | attribute/value pairs read from the original |
//! | `derivative` | one row per (attachment, width, height, allow_crop) |
//!
//! Child rows go away with their attachment (`ON DELETE CASCADE`).
//!
//! A plain `UNIQUE (attachment_id, width, height, allow_crop)` would not stop
//! two "full size" rows, since SQL treats every NULL as distinct. The unique
//! index is built over `IFNULL(width, 0)` instead; zero is never a legal size,
//! so it can't collide with a real one.
//!
//! The connection sits behind a mutex so the catalog is `Sync`. Each method
//! holds the lock for one statement (or one transaction), never across image
//! work. Several processes may open the same file; on-disk catalogs use WAL
//! and a busy timeout so they queue instead of failing.

use crate::dimensions::Dimensions;
use log::debug;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attachment (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    mime_type   TEXT NOT NULL,
    orientation INTEGER
);

CREATE TABLE IF NOT EXISTS attachment_exif (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    attachment_id INTEGER NOT NULL REFERENCES attachment(id) ON DELETE CASCADE,
    attribute     TEXT NOT NULL,
    value         TEXT NOT NULL,
    UNIQUE (attachment_id, attribute)
);

CREATE TABLE IF NOT EXISTS derivative (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    attachment_id INTEGER NOT NULL REFERENCES attachment(id) ON DELETE CASCADE,
    width         INTEGER,
    height        INTEGER,
    allow_crop    INTEGER NOT NULL,
    mime_type     TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS derivative_key
    ON derivative (attachment_id, IFNULL(width, 0), IFNULL(height, 0), allow_crop);
";

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Another writer already holds this key.
    #[error("Duplicate key")]
    DuplicateKey,
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub mime_type: String,
    /// Raw EXIF orientation code, if the original carried one.
    pub orientation: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivativeRecord {
    pub id: i64,
    pub attachment_id: i64,
    pub dimensions: Dimensions,
    pub mime_type: String,
}

const ATTACHMENT_COLUMNS: &str = "id, mime_type, orientation";
const DERIVATIVE_COLUMNS: &str = "id, attachment_id, width, height, allow_crop, mime_type";

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<AttachmentRecord> {
    Ok(AttachmentRecord {
        id: row.get(0)?,
        mime_type: row.get(1)?,
        orientation: row.get(2)?,
    })
}

fn derivative_from_row(row: &Row<'_>) -> rusqlite::Result<DerivativeRecord> {
    Ok(DerivativeRecord {
        id: row.get(0)?,
        attachment_id: row.get(1)?,
        dimensions: Dimensions::new(row.get(2)?, row.get(3)?, row.get(4)?),
        mime_type: row.get(5)?,
    })
}

/// Translate a unique-index violation into [`CatalogError::DuplicateKey`].
fn map_insert_error(err: rusqlite::Error) -> CatalogError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == ErrorCode::ConstraintViolation
            && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        {
            return CatalogError::DuplicateKey;
        }
    }
    CatalogError::Sqlite(err)
}

pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        debug!("Opening catalog at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Readers never wait on a writer in WAL mode
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Catalog journal mode: {mode}");
        Self::init(conn)
    }

    /// Private in-memory catalog, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CatalogError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A panic while holding the lock can't leave SQLite half-written, so a
    /// poisoned mutex is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    pub fn insert_attachment(
        &self,
        mime_type: &str,
        orientation: Option<i64>,
    ) -> Result<AttachmentRecord, CatalogError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO attachment (mime_type, orientation) VALUES (?1, ?2)",
            params![mime_type, orientation],
        )?;
        Ok(AttachmentRecord {
            id: conn.last_insert_rowid(),
            mime_type: mime_type.to_string(),
            orientation,
        })
    }

    pub fn attachment(&self, id: i64) -> Result<Option<AttachmentRecord>, CatalogError> {
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachment WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id], attachment_from_row)
            .optional()?)
    }

    /// Every attachment, oldest first.
    pub fn attachments(&self) -> Result<Vec<AttachmentRecord>, CatalogError> {
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachment ORDER BY id");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], attachment_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns false if no such attachment exists.
    pub fn set_orientation(&self, id: i64, orientation: Option<i64>) -> Result<bool, CatalogError> {
        let changed = self.conn().execute(
            "UPDATE attachment SET orientation = ?1 WHERE id = ?2",
            params![orientation, id],
        )?;
        Ok(changed > 0)
    }

    /// Replace the whole attribute set of an attachment in one transaction.
    pub fn replace_attributes(
        &self,
        id: i64,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), CatalogError> {
        let mut conn = self.conn();
        // Deferred transactions can fail to upgrade under contention
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM attachment_exif WHERE attachment_id = ?1",
            params![id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attachment_exif (attachment_id, attribute, value) VALUES (?1, ?2, ?3)",
            )?;
            for (attribute, value) in attributes {
                stmt.execute(params![id, attribute, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn attributes(&self, id: i64) -> Result<BTreeMap<String, String>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT attribute, value FROM attachment_exif WHERE attachment_id = ?1",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<BTreeMap<_, _>, _>>()?)
    }

    /// Delete an attachment row. Its attributes and derivative rows cascade.
    pub fn delete_attachment(&self, id: i64) -> Result<bool, CatalogError> {
        let changed = self
            .conn()
            .execute("DELETE FROM attachment WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Derivatives
    // =========================================================================

    /// Look up the derivative for a key. `IS` compares NULLs as equal.
    pub fn find_derivative(
        &self,
        attachment_id: i64,
        dims: &Dimensions,
    ) -> Result<Option<DerivativeRecord>, CatalogError> {
        let sql = format!(
            "SELECT {DERIVATIVE_COLUMNS} FROM derivative
             WHERE attachment_id = ?1 AND width IS ?2 AND height IS ?3 AND allow_crop = ?4"
        );
        Ok(self
            .conn()
            .query_row(
                &sql,
                params![attachment_id, dims.width, dims.height, dims.allow_crop],
                derivative_from_row,
            )
            .optional()?)
    }

    /// Insert a new derivative row.
    ///
    /// Fails with [`CatalogError::DuplicateKey`] if the key already exists,
    /// which callers treat as "someone else got there first".
    pub fn insert_derivative(
        &self,
        attachment_id: i64,
        dims: &Dimensions,
        mime_type: &str,
    ) -> Result<DerivativeRecord, CatalogError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO derivative (attachment_id, width, height, allow_crop, mime_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![attachment_id, dims.width, dims.height, dims.allow_crop, mime_type],
        )
        .map_err(map_insert_error)?;
        Ok(DerivativeRecord {
            id: conn.last_insert_rowid(),
            attachment_id,
            dimensions: *dims,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn derivative(&self, id: i64) -> Result<Option<DerivativeRecord>, CatalogError> {
        let sql = format!("SELECT {DERIVATIVE_COLUMNS} FROM derivative WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id], derivative_from_row)
            .optional()?)
    }

    /// Derivatives of one attachment, oldest first.
    pub fn derivatives_for(&self, attachment_id: i64) -> Result<Vec<DerivativeRecord>, CatalogError> {
        let sql = format!(
            "SELECT {DERIVATIVE_COLUMNS} FROM derivative WHERE attachment_id = ?1 ORDER BY id"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![attachment_id], derivative_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn all_derivatives(&self) -> Result<Vec<DerivativeRecord>, CatalogError> {
        let sql = format!("SELECT {DERIVATIVE_COLUMNS} FROM derivative ORDER BY id");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], derivative_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
