//! Canonical image metadata record
//!
//! The record carries a fixed set of structural attributes:
//! file type, EXIF orientation, pixel dimensions and the JPEG quality estimate.
//! Tool output is first held as [`RawAttributes`], keyed by ExifTool tag names,
//! and converted once it has been normalized.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Unnormalized tag/value pairs as parsed from a tool's JSON output
pub type RawAttributes = HashMap<String, Value>;

pub const FILE_TYPE: &str = "FileType";
pub const ORIENTATION: &str = "Orientation";
pub const IMAGE_HEIGHT: &str = "ImageHeight";
pub const IMAGE_WIDTH: &str = "ImageWidth";
pub const JPEG_QUALITY_ESTIMATE: &str = "JPEGQualityEstimate";

/// The tags requested from the primary tool, in request order
pub const REQUESTED_TAGS: [&str; 5] = [
    ORIENTATION,
    FILE_TYPE,
    IMAGE_HEIGHT,
    IMAGE_WIDTH,
    JPEG_QUALITY_ESTIMATE,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Container type as reported by the tool ("JPEG", "PNG", "SVG", ...)
    #[serde(rename = "FileType", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    /// EXIF orientation (1-8)
    #[serde(rename = "Orientation", skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u8>,

    /// Height in pixels
    #[serde(rename = "ImageHeight", skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,

    /// Width in pixels
    #[serde(rename = "ImageWidth", skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,

    #[serde(rename = "JPEGQualityEstimate", skip_serializing_if = "Option::is_none")]
    pub jpeg_quality_estimate: Option<u32>,
}

/// Which tool produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataBackend {
    /// ExifTool (primary)
    ExifTool,
    /// ImageMagick (fallback for containers ExifTool cannot parse)
    ImageMagick,
}

impl ImageMetadata {
    /// Build a record from already-normalized raw attributes.
    ///
    /// Values of the wrong shape are dropped rather than rejected.
    pub fn from_raw(raw: &RawAttributes) -> Self {
        Self {
            file_type: raw.get(FILE_TYPE).and_then(value_as_string),
            orientation: raw
                .get(ORIENTATION)
                .and_then(value_as_u32)
                .and_then(orientation_from_u32),
            image_height: raw.get(IMAGE_HEIGHT).and_then(value_as_u32),
            image_width: raw.get(IMAGE_WIDTH).and_then(value_as_u32),
            jpeg_quality_estimate: raw.get(JPEG_QUALITY_ESTIMATE).and_then(value_as_u32),
        }
    }

    /// Orientations 5-8 swap the stored axes
    pub fn is_transposed(&self) -> bool {
        matches!(self.orientation, Some(5..=8))
    }

    /// (width, height) as the image is meant to be displayed
    pub fn display_dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.image_width?, self.image_height?);
        if self.is_transposed() {
            Some((h, w))
        } else {
            Some((w, h))
        }
    }

    /// Aspect ratio as string (e.g., "16:9", "3:2")
    pub fn aspect_ratio(&self) -> Option<String> {
        let (w, h) = self.display_dimensions()?;
        if w == 0 || h == 0 {
            return None;
        }
        let g = gcd(w, h);
        Some(format!("{}:{}", w / g, h / g))
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integers, integral-looking floats and numeric strings
pub(crate) fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn orientation_from_u32(value: u32) -> Option<u8> {
    match value {
        1..=8 => Some(value as u8),
        _ => None,
    }
}

/// Map an ImageMagick orientation name onto its EXIF value
pub fn orientation_from_name(name: &str) -> Option<u8> {
    match name {
        "TopLeft" => Some(1),
        "TopRight" => Some(2),
        "BottomRight" => Some(3),
        "BottomLeft" => Some(4),
        "LeftTop" => Some(5),
        "RightTop" => Some(6),
        "RightBottom" => Some(7),
        "LeftBottom" => Some(8),
        _ => name.trim().parse().ok().and_then(orientation_from_u32),
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}
