//! CLI output formatting for every command.
//!
//! # Display Contract
//!
//! Every entity leads with its id and what it *is* (MIME type, size name);
//! paths, digests and cache status follow as indented context lines:
//!
//! ```text
//! #12 image/jpeg (orientation 6)
//!     Stored: storage/attachments/0/1/12.jpg
//!     SHA-256: 9f86d081884c7d65…
//! ```
//!
//! ## Get
//!
//! ```text
//! #12 thumbnail 300x300 → storage/derivatives/0/4/47.jpg (created)
//!     SHA-256: 2c26b46b68ffc68f…
//! ```
//!
//! ## List
//!
//! ```text
//! #12 image/jpeg (orientation 6)
//!     thumbnail 300x300 → #47
//!     single 960~720 → #48 (missing)
//! ```
//!
//! ## Audit
//!
//! ```text
//! Attachments: 3 files, clean
//! Derivatives: 9 files, 1 orphan, 1 missing
//!     orphan storage/derivatives/0/0/7.jpg
//!     missing #8
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::attachments::Deleted;
use crate::audit::{AuditReport, TreeReport};
use crate::catalog::{AttachmentRecord, DerivativeRecord};
use crate::derivatives::{Derivative, Lookup};
use crate::dimensions::{CannedDimensions, Dimensions};
use crate::imaging::Plan;
use serde::Serialize;
use std::path::Path;

/// One attachment and the state of its derivatives, as shown by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub attachment: AttachmentRecord,
    pub derivatives: Vec<DerivativeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivativeEntry {
    pub record: DerivativeRecord,
    pub materialized: bool,
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `#12 image/jpeg (orientation 6)`
fn attachment_header(attachment: &AttachmentRecord) -> String {
    match attachment.orientation {
        Some(o) => format!("#{} {} (orientation {})", attachment.id, attachment.mime_type, o),
        None => format!("#{} {}", attachment.id, attachment.mime_type),
    }
}

/// Size label: canned name first when the triple has one.
///
/// ```text
/// thumbnail 300x300
/// 50~10
/// ```
fn size_label(dims: &Dimensions, canned: &CannedDimensions) -> String {
    match canned.name_of(dims) {
        Some(name) => format!("{name} {dims}"),
        None => dims.to_string(),
    }
}

fn lookup_label(lookup: Lookup) -> &'static str {
    match lookup {
        Lookup::Hit => "cached",
        Lookup::Created => "created",
        Lookup::Healed => "healed",
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Ingest / Get
// ============================================================================

pub fn format_ingest(attachment: &AttachmentRecord, path: &Path, digest: &str) -> Vec<String> {
    vec![
        attachment_header(attachment),
        format!("{}Stored: {}", indent(1), path.display()),
        format!("{}SHA-256: {}", indent(1), digest),
    ]
}

pub fn print_ingest(attachment: &AttachmentRecord, path: &Path, digest: &str) {
    for line in format_ingest(attachment, path, digest) {
        println!("{}", line);
    }
}

pub fn format_derivative(
    derivative: &Derivative,
    canned: &CannedDimensions,
    digest: &str,
) -> Vec<String> {
    vec![
        format!(
            "#{} {} \u{2192} {} ({})",
            derivative.record.attachment_id,
            size_label(&derivative.record.dimensions, canned),
            derivative.path.display(),
            lookup_label(derivative.lookup)
        ),
        format!("{}SHA-256: {}", indent(1), digest),
    ]
}

pub fn print_derivative(derivative: &Derivative, canned: &CannedDimensions, digest: &str) {
    for line in format_derivative(derivative, canned, digest) {
        println!("{}", line);
    }
}

/// Dry-run result of `get --plan`.
///
/// ```text
/// #12 thumbnail 300x300: crop 12,0 76x76 → 300x300
/// #12 20~: resize → 20x15
/// ```
pub fn format_plan(
    attachment_id: i64,
    dims: &Dimensions,
    plan: &Plan,
    canned: &CannedDimensions,
) -> Vec<String> {
    let steps = match plan.crop {
        Some(rect) => format!(
            "crop {},{} {}x{}",
            rect.left,
            rect.top,
            rect.width(),
            rect.height()
        ),
        None => "resize".to_string(),
    };
    vec![format!(
        "#{} {}: {} \u{2192} {}x{}",
        attachment_id,
        size_label(dims, canned),
        steps,
        plan.output.0,
        plan.output.1
    )]
}

// ============================================================================
// List
// ============================================================================

pub fn format_list(entries: &[ListEntry], canned: &CannedDimensions) -> Vec<String> {
    if entries.is_empty() {
        return vec!["No attachments".to_string()];
    }

    let mut lines = Vec::new();
    for entry in entries {
        lines.push(attachment_header(&entry.attachment));
        for derivative in &entry.derivatives {
            let status = if derivative.materialized {
                ""
            } else {
                " (missing)"
            };
            lines.push(format!(
                "{}{} \u{2192} #{}{}",
                indent(1),
                size_label(&derivative.record.dimensions, canned),
                derivative.record.id,
                status
            ));
        }
    }
    lines
}

pub fn print_list(entries: &[ListEntry], canned: &CannedDimensions) {
    for line in format_list(entries, canned) {
        println!("{}", line);
    }
}

/// Whitelisted sizes, one per line, names aligned.
pub fn format_dimensions(canned: &CannedDimensions) -> Vec<String> {
    let width = canned.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    canned
        .iter()
        .map(|(name, dims)| {
            let mode = if dims.allow_crop { "crop" } else { "fit" };
            format!("{name:<width$}  {dims:<10} {mode}")
        })
        .collect()
}

pub fn print_dimensions(canned: &CannedDimensions) {
    for line in format_dimensions(canned) {
        println!("{}", line);
    }
}

// ============================================================================
// Delete / Audit
// ============================================================================

pub fn format_deleted(deleted: &Deleted) -> Vec<String> {
    vec![format!(
        "Deleted {} with {} ({} removed)",
        attachment_header(&deleted.attachment),
        plural(deleted.derivatives, "derivative"),
        plural(deleted.files_removed, "file")
    )]
}

fn format_tree_report(label: &str, report: &TreeReport) -> Vec<String> {
    let mut header = format!("{label}: {}", plural(report.files, "file"));
    if report.is_clean() {
        header.push_str(", clean");
    } else {
        header.push_str(&format!(
            ", {}, {} missing",
            plural(report.orphans.len(), "orphan"),
            report.missing.len()
        ));
    }

    let mut lines = vec![header];
    for orphan in &report.orphans {
        lines.push(format!("{}orphan {}", indent(1), orphan.path.display()));
    }
    for id in &report.missing {
        lines.push(format!("{}missing #{}", indent(1), id));
    }
    lines
}

pub fn format_audit(report: &AuditReport) -> Vec<String> {
    let mut lines = format_tree_report("Attachments", &report.attachments);
    lines.extend(format_tree_report("Derivatives", &report.derivatives));
    if report.removed > 0 {
        lines.push(format!("Removed {}", plural(report.removed, "orphan")));
    }
    lines
}

pub fn print_audit(report: &AuditReport) {
    for line in format_audit(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
