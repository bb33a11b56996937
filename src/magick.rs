//! Fallback backend: ImageMagick
//!
//! Only consulted when ExifTool rejects a container. Renders the first frame,
//! cropped to 1x1 so the render is cheap while `pageGeometry` still reports the
//! full canvas, and reads ImageMagick's `json:` description of it.
//! Dimensions are already in pixels, so the result is not normalized.

use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::command::{path_arg, CommandRunner, ToolCommand, ToolError};
use crate::metadata::{orientation_from_name, value_as_u32, ImageMetadata};

pub struct MagickExtractor<'a> {
    program: &'a str,
    runner: &'a dyn CommandRunner,
}

impl<'a> MagickExtractor<'a> {
    pub fn new(program: &'a str, runner: &'a dyn CommandRunner) -> Self {
        Self { program, runner }
    }

    pub fn command(&self, path: &Path) -> ToolCommand {
        ToolCommand::new(self.program)
            .arg(format!("{}[0]", path_arg(path)))
            .args(&["-crop", "1x1+0+0", "json:-"])
    }

    /// `None` when ImageMagick fails or describes no image; errors are logged, not returned
    pub fn extract(&self, path: &Path) -> Option<ImageMetadata> {
        match self.try_extract(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("ImageMagick fallback failed on {}: {}", path.display(), e);
                None
            }
        }
    }

    fn try_extract(&self, path: &Path) -> Result<Option<ImageMetadata>, ToolError> {
        let output = self.command(path).execute(self.runner)?;
        if !output.success {
            return Err(ToolError::ExecutionFailed(output.stderr_text().trim().to_string()));
        }

        let parsed: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ToolError::InvalidOutput(format!("JSON parse error: {}", e)))?;

        let image = match &parsed {
            Value::Array(frames) => frames.first().and_then(|frame| frame.get("image")),
            other => other.get("image"),
        };

        Ok(image.map(parse_image_description))
    }
}

/// Map ImageMagick's image description onto the canonical record
pub fn parse_image_description(image: &Value) -> ImageMetadata {
    let page = image.get("pageGeometry");

    ImageMetadata {
        file_type: image.get("format").and_then(Value::as_str).map(str::to_string),
        orientation: image.get("orientation").and_then(|o| match o {
            Value::String(name) => orientation_from_name(name),
            other => value_as_u32(other).and_then(|n| u8::try_from(n).ok()).filter(|n| (1..=8).contains(n)),
        }),
        image_height: page.and_then(|p| p.get("height")).and_then(value_as_u32),
        image_width: page.and_then(|p| p.get("width")).and_then(value_as_u32),
        jpeg_quality_estimate: image.get("quality").and_then(value_as_u32),
    }
}
