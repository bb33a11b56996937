//! Image metadata extraction
//!
//! ## Backend Priority
//!
//! 1. **ExifTool** (primary) - result is normalized (units, file type)
//! 2. **ImageMagick** (fallback) - only when ExifTool reports a file format error;
//!    its result is returned as-is
//!
//! Any other ExifTool failure, or a fallback that yields nothing, surfaces as
//! [`MetadataError::ExtractionFailed`] carrying the ExifTool diagnostic.
//!
//! ## Example
//!
//! ```rust,ignore
//! use soma_image_meta::read_image_metadata;
//!
//! let meta = read_image_metadata("photo.jpg")?;
//! println!("{:?} {}x{}", meta.file_type, meta.image_width.unwrap_or(0), meta.image_height.unwrap_or(0));
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::command::{CommandRunner, SystemRunner};
use crate::error::{MetadataError, Result};
use crate::exiftool::{ExifToolExtractor, PrimaryOutcome};
use crate::magick::MagickExtractor;
use crate::metadata::{ImageMetadata, MetadataBackend};
use crate::normalize::normalize_metadata;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// ExifTool executable
    pub exiftool_path: String,
    /// ImageMagick executable
    pub magick_path: String,
    /// Per-invocation limit; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            exiftool_path: "exiftool".to_string(),
            magick_path: "magick".to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// A record together with the backend that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub metadata: ImageMetadata,
    pub backend: MetadataBackend,
}

/// Stateless extraction service; safe to share across threads
pub struct MetadataExtractor {
    config: ExtractorConfig,
    runner: Arc<dyn CommandRunner>,
}

impl MetadataExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let runner = Arc::new(SystemRunner::with_timeout(config.timeout));
        Self { config, runner }
    }

    pub fn with_runner(config: ExtractorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract(&self, path: &Path) -> Result<ImageMetadata> {
        self.extract_with_backend(path).map(|e| e.metadata)
    }

    pub fn extract_with_backend(&self, path: &Path) -> Result<Extraction> {
        let primary = ExifToolExtractor::new(&self.config.exiftool_path, self.runner.as_ref());

        let message = match primary.extract(path) {
            PrimaryOutcome::Found(raw) => {
                debug!("ExifTool read {}", path.display());
                return Ok(Extraction {
                    metadata: normalize_metadata(raw),
                    backend: MetadataBackend::ExifTool,
                });
            }
            PrimaryOutcome::Failed(message) => {
                return Err(MetadataError::ExtractionFailed {
                    path: path.to_path_buf(),
                    message,
                });
            }
            PrimaryOutcome::FormatUnsupported(message) => message,
        };

        info!("ExifTool cannot parse {}, trying ImageMagick", path.display());

        let fallback = MagickExtractor::new(&self.config.magick_path, self.runner.as_ref());
        match fallback.extract(path) {
            Some(metadata) => Ok(Extraction {
                metadata,
                backend: MetadataBackend::ImageMagick,
            }),
            None => Err(MetadataError::ExtractionFailed {
                path: path.to_path_buf(),
                message,
            }),
        }
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

/// Read the canonical metadata of `path` with default tools and settings
pub fn read_image_metadata(path: impl AsRef<Path>) -> Result<ImageMetadata> {
    MetadataExtractor::default().extract(path.as_ref())
}
