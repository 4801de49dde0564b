//! EXIF attribute extraction.
//!
//! Attachments keep a flat `attribute → value` map of whatever EXIF the
//! original carried. Only the orientation is interpreted; everything else is
//! stored for display.
//!
//! Values are human-readable (`"1/125 s"`, `"f/2.8"`) except
//! [`ORIENTATION_KEY`], which stays the raw numeric code so it can be parsed
//! back by [`orientation_of`].

use log::debug;
use std::collections::BTreeMap;
use std::io::Cursor;

/// Attribute name under which the orientation code is stored.
pub const ORIENTATION_KEY: &str = "Orientation";

/// Longest value kept per attribute, in characters.
pub const VALUE_LENGTH: usize = 255;

pub type ExifAttributes = BTreeMap<String, String>;

/// Source of EXIF attributes for encoded image bytes.
///
/// Never fails: images without EXIF, or with EXIF we can't parse, yield an
/// empty map.
pub trait ExifReader: Send + Sync {
    fn read(&self, data: &[u8]) -> ExifAttributes;
}

/// [`ExifReader`] backed by `kamadak-exif`. Understands JPEG, TIFF, PNG,
/// WebP and HEIF containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct KamadakExif;

impl ExifReader for KamadakExif {
    fn read(&self, data: &[u8]) -> ExifAttributes {
        let exif = match ::exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
            Ok(exif) => exif,
            Err(e) => {
                debug!("No usable EXIF: {e}");
                return ExifAttributes::new();
            }
        };

        let mut attributes = ExifAttributes::new();
        for field in exif.fields() {
            // Thumbnail IFD repeats primary tags with thumbnail values
            if field.ifd_num != ::exif::In::PRIMARY || field.tag == ::exif::Tag::MakerNote {
                continue;
            }

            let value = if field.tag == ::exif::Tag::Orientation {
                match field.value.get_uint(0) {
                    Some(code) => code.to_string(),
                    None => continue,
                }
            } else {
                field.display_value().with_unit(&exif).to_string()
            };

            attributes
                .entry(field.tag.to_string())
                .or_insert_with(|| truncate(&value));
        }
        attributes
    }
}

fn truncate(value: &str) -> String {
    value.chars().take(VALUE_LENGTH).collect()
}

/// Parse the orientation code out of an attribute map.
pub fn orientation_of(attributes: &ExifAttributes) -> Option<i64> {
    attributes.get(ORIENTATION_KEY)?.trim().parse().ok()
}
