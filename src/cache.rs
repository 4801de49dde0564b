//! Derivative cache statistics and payload digests.
//!
//! The derivative tree *is* the cache: a record plus a file on disk is a hit.
//! This module only counts what happened during a run and fingerprints
//! payloads so callers (and tests) can tell whether bytes changed.
//!
//! Digests are SHA-256 over the file contents, hex encoded.

use crate::derivatives::Lookup;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::Path;

/// SHA-256 of a byte slice, as a lowercase hex string.
pub fn digest_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// SHA-256 of a file's contents, as a lowercase hex string.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

/// Summary of derivative lookups for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Record and file were both present.
    pub hits: u32,
    /// New record, freshly rendered.
    pub created: u32,
    /// Record existed but its file was missing; re-rendered.
    pub healed: u32,
    pub failed: u32,
}

impl CacheStats {
    pub fn record(&mut self, lookup: Lookup) {
        match lookup {
            Lookup::Hit => self.hits += 1,
            Lookup::Created => self.created += 1,
            Lookup::Healed => self.healed += 1,
        }
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    /// Number of lookups that rendered an image.
    pub fn rendered(&self) -> u32 {
        self.created + self.healed
    }

    pub fn total(&self) -> u32 {
        self.hits + self.created + self.healed + self.failed
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.healed > 0 {
            if self.healed > 0 {
                write!(
                    f,
                    "{} cached, {} healed, {} created ({} total)",
                    self.hits,
                    self.healed,
                    self.created,
                    self.total()
                )?;
            } else {
                write!(
                    f,
                    "{} cached, {} created ({} total)",
                    self.hits,
                    self.created,
                    self.total()
                )?;
            }
        } else {
            write!(f, "{} created", self.created)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}
