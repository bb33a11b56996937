//! Corrections applied to primary-tool output
//!
//! Dimensions reported with a unit suffix (SVG documents commonly say `72pt`)
//! are converted to pixels. ExifTool identifies extension-less SVG intermediates
//! as `XMP` because the content is XML; in this pipeline any XML input is an SVG,
//! so that file type is rewritten.

use serde_json::Value;
use tracing::debug;

use crate::metadata::{ImageMetadata, RawAttributes, FILE_TYPE, IMAGE_HEIGHT, IMAGE_WIDTH};
use crate::units;

const MISIDENTIFIED_FILE_TYPE: &str = "XMP";
const CORRECTED_FILE_TYPE: &str = "SVG";

/// Apply unit conversion then file-type correction. Idempotent.
pub fn normalize(mut raw: RawAttributes) -> RawAttributes {
    for key in [IMAGE_HEIGHT, IMAGE_WIDTH] {
        let converted = match raw.get(key) {
            Some(Value::String(text)) => units::to_pixels(text).ok_or_else(|| text.clone()),
            _ => continue,
        };
        match converted {
            Ok(pixels) => {
                raw.insert(key.to_string(), Value::from(pixels));
            }
            Err(text) => {
                debug!("Dropping unconvertible {}: {:?}", key, text);
                raw.remove(key);
            }
        }
    }

    if raw.get(FILE_TYPE).and_then(Value::as_str) == Some(MISIDENTIFIED_FILE_TYPE) {
        raw.insert(FILE_TYPE.to_string(), Value::from(CORRECTED_FILE_TYPE));
    }

    raw
}

/// Normalize and convert into the canonical record
pub fn normalize_metadata(raw: RawAttributes) -> ImageMetadata {
    ImageMetadata::from_raw(&normalize(raw))
}
