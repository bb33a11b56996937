//! soma_image_meta - structural image metadata for the SOMA platform
//!
//! Reads file type, EXIF orientation, pixel dimensions and the JPEG quality
//! estimate by shelling out to `exiftool`, falling back to ImageMagick for
//! containers ExifTool cannot parse.

pub mod command;
pub mod error;
pub mod exiftool;
pub mod extractor;
pub mod magick;
pub mod metadata;
pub mod metrics;
pub mod normalize;
pub mod organ;
pub mod units;

pub use command::{CommandOutput, CommandRunner, SystemRunner, ToolCommand, ToolError};
pub use error::{MetadataError, Result};
pub use extractor::{read_image_metadata, Extraction, ExtractorConfig, MetadataExtractor};
pub use metadata::{ImageMetadata, MetadataBackend, RawAttributes};
pub use normalize::normalize;
