//! # shardpix
//!
//! A store for original images and the resized copies ("derivatives") served
//! from them. Originals are written once; derivatives are rendered on first
//! request and read from disk afterwards.
//!
//! # Architecture: Catalog + Two Trees
//!
//! ```text
//!              ┌──────────────┐
//!  ingest ───► │   catalog    │ ◄─── get_or_create(id, 300x300)
//!              │   (SQLite)   │            │
//!              └──────┬───────┘            │ render on miss
//!                     │ ids                ▼
//!     attachments/d1/d2/<id>.jpg ──► derivatives/d1/d2/<id>.jpg
//! ```
//!
//! The catalog owns ids and uniqueness. File bytes never go through it: both
//! trees are plain directories addressed by id, so any file server can serve
//! them directly.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`storage`] | Id → `base/d1/d2/<id><ext>` resolution and atomic writes |
//! | [`dimensions`] | Size triples, their path-segment form, and the canned whitelist |
//! | [`catalog`] | SQLite tables for attachments, EXIF attributes and derivatives |
//! | [`exif`] | EXIF attribute extraction (`kamadak-exif`) |
//! | [`attachments`] | Ingest, read, re-read EXIF, and delete originals |
//! | [`imaging`] | Orientation, crop/resize geometry, and encoding |
//! | [`materialize`] | Source bytes → rendered derivative file |
//! | [`derivatives`] | Whitelisted get-or-create with self-healing and parallel warm-up |
//! | [`cache`] | Run statistics and payload digests |
//! | [`audit`] | Catalog vs. disk consistency check |
//! | [`config`] | `shardpix.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Whitelisted Sizes Only
//!
//! Sizes are requested by URL-like segments (`300x300.jpg`). Without a
//! whitelist, anyone who can edit a URL could make the server render and
//! store unbounded numbers of images. Only triples in
//! [`config::Config::dimensions`] are ever rendered; everything else is
//! reported as not found.
//!
//! ## Optimistic Inserts
//!
//! Two requests for the same missing derivative both try to insert its row.
//! The unique index lets exactly one succeed; the other reads the winner's row
//! back. No lock is held while rendering.
//!
//! ## Output Format Follows Source
//!
//! A JPEG original produces JPEG derivatives, a PNG original PNG derivatives.
//! There is no format negotiation and no fallback.

pub mod attachments;
pub mod audit;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod derivatives;
pub mod dimensions;
pub mod exif;
pub mod imaging;
pub mod materialize;
pub mod output;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;
