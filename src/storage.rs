//! Two-level sharded filesystem layout.
//!
//! Attachments and derivatives each live in their own tree with the same
//! shape. The two shard levels come from the leading digits of the record id,
//! which caps fan-out at 10 × 10 directories no matter how many files the
//! tree holds:
//!
//! ```text
//! derivatives/
//! ├── 0/
//! │   ├── 0/7.jpg          # id 7      → d1=0, d2=0
//! │   └── 4/42.png         # id 42     → d1=0, d2=4
//! ├── 1/
//! │   └── 2/1234.jpg       # id 1234   → d1=1, d2=2
//! └── 9/
//!     └── 8/98765.dat      # unknown MIME type → fallback extension
//! ```
//!
//! Writes go through [`ShardedTree::write_atomic`]: bytes land in a temp file
//! next to the destination and are renamed into place, so a concurrent reader
//! sees either the old file, the new file, or nothing.

use log::debug;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Extension used when the MIME type is not in [`KNOWN_EXTENSIONS`].
pub const FALLBACK_EXTENSION: &str = ".dat";

/// MIME type → on-disk extension. Checked before falling back.
pub const KNOWN_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/tiff", ".tiff"),
    ("image/bmp", ".bmp"),
];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage misconfigured: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Look up the file extension (with leading dot) for a MIME type.
pub fn extension_for(mime_type: &str) -> &'static str {
    KNOWN_EXTENSIONS
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(mime_type))
        .map(|(_, ext)| *ext)
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Pick the two shard directory names for an id.
///
/// - 1 digit → `("0", "0")`
/// - 2 digits → `("0", first digit)`
/// - 3+ digits → first two digits
pub fn shard_dirs(id: i64) -> (char, char) {
    let id_str = id.to_string();
    let mut digits = id_str.chars();
    match id_str.len() {
        0 | 1 => ('0', '0'),
        2 => ('0', digits.next().unwrap_or('0')),
        _ => (
            digits.next().unwrap_or('0'),
            digits.next().unwrap_or('0'),
        ),
    }
}

/// Resolve `base_dir/d1/d2/<id><ext>` without touching the filesystem.
///
/// An empty `base_dir` or a non-positive `id` means the caller is working with
/// an unconfigured store or a record that was never assigned an id.
pub fn shard_path(base_dir: &Path, id: i64, mime_type: &str) -> Result<PathBuf, StorageError> {
    if base_dir.as_os_str().is_empty() {
        return Err(StorageError::Configuration(
            "base directory is not set".into(),
        ));
    }
    if id <= 0 {
        return Err(StorageError::Configuration(format!(
            "id {id} has not been assigned"
        )));
    }
    let (d1, d2) = shard_dirs(id);
    Ok(base_dir
        .join(d1.to_string())
        .join(d2.to_string())
        .join(format!("{}{}", id, extension_for(mime_type))))
}

/// One sharded tree rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct ShardedTree {
    base_dir: PathBuf,
}

impl ShardedTree {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path for reading. Does not create anything.
    pub fn path_for(&self, id: i64, mime_type: &str) -> Result<PathBuf, StorageError> {
        shard_path(&self.base_dir, id, mime_type)
    }

    /// Path for writing: creates the shard directories if needed.
    pub fn prepare_path(&self, id: i64, mime_type: &str) -> Result<PathBuf, StorageError> {
        let path = self.path_for(id, mime_type)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Whether a regular file exists at the path for `id`.
    pub fn exists(&self, id: i64, mime_type: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(id, mime_type)?.is_file())
    }

    pub fn read(&self, id: i64, mime_type: &str) -> Result<Vec<u8>, StorageError> {
        Ok(std::fs::read(self.path_for(id, mime_type)?)?)
    }

    /// Size in bytes of the stored file.
    pub fn size(&self, id: i64, mime_type: &str) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(self.path_for(id, mime_type)?)?.len())
    }

    /// Write `data` for `id`, replacing any existing file atomically.
    ///
    /// The temp file is created in the destination directory so the final
    /// rename never crosses a filesystem boundary.
    pub fn write_atomic(
        &self,
        id: i64,
        mime_type: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.prepare_path(id, mime_type)?;
        let dir = path.parent().unwrap_or(&self.base_dir);

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(path)
    }

    /// Remove the file for `id`. Missing files are not an error.
    pub fn remove(&self, id: i64, mime_type: &str) -> Result<bool, StorageError> {
        let path = self.path_for(id, mime_type)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse a leaf file name (`1234.jpg`) back into its id.
///
/// Returns `None` for anything that doesn't look like a sharded leaf,
/// including leftover temp files.
pub fn parse_leaf_name(file_name: &str) -> Option<i64> {
    let (stem, _ext) = file_name.split_once('.')?;
    stem.parse::<i64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Shard directory selection
    // =========================================================================

    #[test]
    fn single_digit_ids_use_zero_zero() {
        assert_eq!(shard_dirs(1), ('0', '0'));
        assert_eq!(shard_dirs(9), ('0', '0'));
    }

    #[test]
    fn two_digit_ids_use_zero_then_first_digit() {
        assert_eq!(shard_dirs(10), ('0', '1'));
        assert_eq!(shard_dirs(42), ('0', '4'));
        assert_eq!(shard_dirs(99), ('0', '9'));
    }

    #[test]
    fn longer_ids_use_first_two_digits() {
        assert_eq!(shard_dirs(100), ('1', '0'));
        assert_eq!(shard_dirs(1234), ('1', '2'));
        assert_eq!(shard_dirs(987_654_321), ('9', '8'));
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    #[test]
    fn shard_path_layout() {
        let base = Path::new("/srv/derivatives");
        assert_eq!(
            shard_path(base, 7, "image/jpeg").unwrap(),
            Path::new("/srv/derivatives/0/0/7.jpg")
        );
        assert_eq!(
            shard_path(base, 42, "image/png").unwrap(),
            Path::new("/srv/derivatives/0/4/42.png")
        );
        assert_eq!(
            shard_path(base, 1234, "image/jpeg").unwrap(),
            Path::new("/srv/derivatives/1/2/1234.jpg")
        );
    }

    #[test]
    fn unknown_mime_uses_fallback_extension() {
        let path = shard_path(Path::new("/x"), 5, "application/x-mystery").unwrap();
        assert_eq!(path, Path::new("/x/0/0/5.dat"));
    }

    #[test]
    fn mime_lookup_ignores_case() {
        assert_eq!(extension_for("IMAGE/JPEG"), ".jpg");
    }

    #[test]
    fn empty_base_dir_is_configuration_error() {
        let result = shard_path(Path::new(""), 5, "image/jpeg");
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn unassigned_id_is_configuration_error() {
        let result = shard_path(Path::new("/x"), 0, "image/jpeg");
        assert!(matches!(result, Err(StorageError::Configuration(_))));
        let result = shard_path(Path::new("/x"), -3, "image/jpeg");
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    // =========================================================================
    // ShardedTree filesystem operations
    // =========================================================================

    #[test]
    fn prepare_path_creates_parents_idempotently() {
        let tmp = TempDir::new().unwrap();
        let tree = ShardedTree::new(tmp.path());

        let first = tree.prepare_path(321, "image/png").unwrap();
        let second = tree.prepare_path(321, "image/png").unwrap();

        assert_eq!(first, second);
        assert!(tmp.path().join("3/2").is_dir());
        assert!(!first.exists());
    }

    #[test]
    fn write_atomic_then_read() {
        let tmp = TempDir::new().unwrap();
        let tree = ShardedTree::new(tmp.path());

        assert!(!tree.exists(12, "image/jpeg").unwrap());
        let path = tree.write_atomic(12, "image/jpeg", b"payload").unwrap();

        assert_eq!(path, tmp.path().join("0/1/12.jpg"));
        assert!(tree.exists(12, "image/jpeg").unwrap());
        assert_eq!(tree.read(12, "image/jpeg").unwrap(), b"payload");
        assert_eq!(tree.size(12, "image/jpeg").unwrap(), 7);
    }

    #[test]
    fn write_atomic_overwrites_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let tree = ShardedTree::new(tmp.path());

        tree.write_atomic(5, "image/png", b"first").unwrap();
        tree.write_atomic(5, "image/png", b"second").unwrap();

        assert_eq!(tree.read(5, "image/png").unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("0/0"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("5.png")]);
    }

    #[test]
    fn remove_reports_whether_file_existed() {
        let tmp = TempDir::new().unwrap();
        let tree = ShardedTree::new(tmp.path());

        tree.write_atomic(77, "image/jpeg", b"x").unwrap();
        assert!(tree.remove(77, "image/jpeg").unwrap());
        assert!(!tree.remove(77, "image/jpeg").unwrap());
    }

    #[test]
    fn parse_leaf_name_accepts_only_id_files() {
        assert_eq!(parse_leaf_name("1234.jpg"), Some(1234));
        assert_eq!(parse_leaf_name("5.dat"), Some(5));
        assert_eq!(parse_leaf_name(".tmpAbC123"), None);
        assert_eq!(parse_leaf_name("notes.txt"), None);
        assert_eq!(parse_leaf_name("1234"), None);
    }
}
