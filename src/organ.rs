//! UMA Organ Interface for soma_image_meta
//!
//! Exposes image metadata extraction through the Stimulus/Response pattern used
//! by SOMA orchestrators.
//!
//! ## Available Operations
//!
//! 1. `image.metadata` - FileType, Orientation, pixel dimensions, JPEG quality
//! 2. `media.capabilities` - Capability card query
//! 3. `media.metrics` - Request counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use soma_image_meta::organ::{MetadataOrgan, Organ, Stimulus};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let organ = MetadataOrgan::new();
//!
//! let response = organ.stimulate(Stimulus {
//!     op: "image.metadata".to_string(),
//!     input: json!({"input_path": "photo.jpg"}),
//!     context: HashMap::new(),
//! }).await?;
//! println!("{}", response.output["metadata"]);
//! # Ok(())
//! # }
//! ```

use crate::extractor::{ExtractorConfig, MetadataExtractor};
use crate::metrics::{Metrics, Timer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const OPERATIONS: [&str; 3] = ["image.metadata", "media.capabilities", "media.metrics"];

/// UMA Stimulus - input to organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// UMA Response - output from organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
    pub cost: Option<f64>,
}

/// Organ trait - all SOMA organs implement this
#[async_trait]
pub trait Organ: Send + Sync {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError>;
    fn describe(&self) -> OrganCard;
}

/// Organ-level errors
#[derive(Debug, Error)]
pub enum OrganError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Metadata(#[from] crate::error::MetadataError),
}

/// Organ capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub division: String,
    pub subsystem: String,
    pub tags: Vec<String>,
    pub execution_modes: Vec<String>,
    pub functions: Vec<FunctionCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MetadataInput {
    input_path: PathBuf,
}

/// Image Metadata Organ
pub struct MetadataOrgan {
    extractor: Arc<MetadataExtractor>,
    metrics: Arc<Metrics>,
}

impl MetadataOrgan {
    pub fn new() -> Self {
        Self::with_extractor(MetadataExtractor::new(ExtractorConfig::default()))
    }

    pub fn with_extractor(extractor: MetadataExtractor) -> Self {
        Self {
            extractor: Arc::new(extractor),
            metrics: Metrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle image.metadata operation
    async fn handle_image_metadata(&self, input: Value) -> Result<Value, OrganError> {
        let input: MetadataInput = serde_json::from_value(input)
            .map_err(|e| OrganError::InvalidInput(e.to_string()))?;

        if !input.input_path.exists() {
            return Err(OrganError::InvalidInput(format!(
                "File not found: {}",
                input.input_path.display()
            )));
        }

        // Tool invocations block for the whole process round trip
        let extractor = Arc::clone(&self.extractor);
        let path = input.input_path.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract_with_backend(&path))
            .await
            .map_err(|e| OrganError::ProcessingError(e.to_string()))??;

        self.metrics.record_backend(extraction.backend);

        Ok(json!({
            "input_path": input.input_path.display().to_string(),
            "metadata": extraction.metadata,
            "backend": extraction.backend,
        }))
    }

    /// Handle media.capabilities operation
    fn handle_capabilities(&self) -> Result<Value, OrganError> {
        let card = self.describe();
        serde_json::to_value(&card).map_err(OrganError::SerializationError)
    }

    async fn dispatch(&self, stimulus: Stimulus) -> Result<Value, OrganError> {
        match stimulus.op.as_str() {
            "image.metadata" => self.handle_image_metadata(stimulus.input).await,
            "media.capabilities" => self.handle_capabilities(),
            "media.metrics" => Ok(json!(self.metrics.snapshot())),
            other => Err(OrganError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl Default for MetadataOrgan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Organ for MetadataOrgan {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError> {
        let timer = Timer::new();
        let op = stimulus.op.clone();

        let result = self.dispatch(stimulus).await;
        let latency = timer.elapsed_ms();
        self.metrics.record_request(&op, result.is_ok(), latency);

        let (ok, output) = match result {
            Ok(output) => (true, output),
            Err(OrganError::UnsupportedOperation(op)) => (
                false,
                json!({
                    "error": format!("Unsupported operation: {}", op),
                    "op": op,
                    "available_operations": OPERATIONS,
                }),
            ),
            Err(e) => {
                debug!("{} failed: {}", op, e);
                (false, json!({ "error": e.to_string() }))
            }
        };

        Ok(Response {
            ok,
            output,
            latency_ms: latency,
            cost: None,
        })
    }

    fn describe(&self) -> OrganCard {
        OrganCard {
            name: "soma_image_meta".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Structural image metadata via ExifTool with ImageMagick fallback".to_string(),
            division: "media".to_string(),
            subsystem: "metadata".to_string(),
            tags: vec![
                "media".to_string(),
                "image".to_string(),
                "metadata".to_string(),
                "exiftool".to_string(),
                "imagemagick".to_string(),
            ],
            execution_modes: vec![
                "embedded".to_string(),
                "server".to_string(),
            ],
            author: Some("SOMA Media Team".to_string()),
            repository: None,
            functions: vec![
                FunctionCard {
                    name: "image.metadata".to_string(),
                    description: "Read file type, orientation, pixel dimensions and JPEG quality estimate of an image".to_string(),
                    tags: vec!["image".to_string(), "metadata".to_string(), "dimensions".to_string()],
                    examples: vec![
                        "Get pixel size of an uploaded JPEG".to_string(),
                        "Read SVG dimensions given in points".to_string(),
                        "Inspect a container ExifTool does not support".to_string(),
                    ],
                    idempotent: true,
                    side_effects: vec!["invokes exiftool".to_string(), "may invoke magick".to_string()],
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "input_path": { "type": "string", "description": "Path to the image file" }
                        },
                        "required": ["input_path"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "input_path": { "type": "string" },
                            "backend": { "type": "string", "enum": ["ExifTool", "ImageMagick"] },
                            "metadata": {
                                "type": "object",
                                "properties": {
                                    "FileType": { "type": "string" },
                                    "Orientation": { "type": "integer" },
                                    "ImageHeight": { "type": "integer" },
                                    "ImageWidth": { "type": "integer" },
                                    "JPEGQualityEstimate": { "type": "integer" }
                                }
                            }
                        }
                    }),
                },
                FunctionCard {
                    name: "media.capabilities".to_string(),
                    description: "Return this capability card".to_string(),
                    tags: vec!["introspection".to_string()],
                    examples: vec!["Discover available operations".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: None,
                    output_schema: json!({ "type": "object" }),
                },
                FunctionCard {
                    name: "media.metrics".to_string(),
                    description: "Request counts, error rate, latency and fallback usage".to_string(),
                    tags: vec!["observability".to_string()],
                    examples: vec!["Check how often the ImageMagick fallback is used".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: None,
                    output_schema: json!({ "type": "object" }),
                },
            ],
        }
    }
}
