//! Primary backend: ExifTool
//!
//! Requests exactly the five canonical tags with numeric (`-n`) JSON output and
//! classifies failures. Only a "File format error" diagnostic is reported as
//! [`PrimaryOutcome::FormatUnsupported`]; every other problem is a plain failure.

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::command::{CommandRunner, ToolCommand, ToolError};
use crate::metadata::{RawAttributes, REQUESTED_TAGS};

/// Diagnostic ExifTool emits when it cannot recognize a container
pub const FORMAT_ERROR_MARKER: &str = "File format error";

/// Per-file error tag ExifTool embeds in its JSON output
const ERROR_TAG: &str = "Error";

/// Result of one primary extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryOutcome {
    /// Raw, unnormalized tags
    Found(RawAttributes),
    /// ExifTool could not parse the container; the fallback may
    FormatUnsupported(String),
    /// Any other failure; not retried
    Failed(String),
}

pub struct ExifToolExtractor<'a> {
    program: &'a str,
    runner: &'a dyn CommandRunner,
}

impl<'a> ExifToolExtractor<'a> {
    pub fn new(program: &'a str, runner: &'a dyn CommandRunner) -> Self {
        Self { program, runner }
    }

    pub fn command(&self, path: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.program).args(&["-n", "-json"]);
        for tag in REQUESTED_TAGS {
            cmd = cmd.arg(format!("-{}", tag));
        }
        cmd.input(path)
    }

    pub fn extract(&self, path: &Path) -> PrimaryOutcome {
        let output = match self.command(path).execute(self.runner) {
            Ok(output) => output,
            Err(e) => {
                debug!("ExifTool could not run on {}: {}", path.display(), e);
                return PrimaryOutcome::Failed(e.to_string());
            }
        };

        let parsed = parse_exiftool_json(&output.stdout);
        let reported = parsed
            .as_ref()
            .ok()
            .and_then(|tags| tags.get(ERROR_TAG))
            .and_then(Value::as_str)
            .map(str::to_string);

        if !output.success || reported.is_some() {
            let stderr = output.stderr_text();
            let mut diagnostics: Vec<&str> = Vec::new();
            if !stderr.trim().is_empty() {
                diagnostics.push(stderr.trim());
            }
            if let Some(reported) = reported.as_deref() {
                diagnostics.push(reported);
            }
            let message = if diagnostics.is_empty() {
                format!("ExifTool exited with status {:?}", output.code)
            } else {
                diagnostics.join("; ")
            };
            debug!("ExifTool failed on {}: {}", path.display(), message);
            return classify_failure(message);
        }

        match parsed {
            Ok(mut tags) => {
                tags.retain(|key, _| REQUESTED_TAGS.contains(&key.as_str()));
                PrimaryOutcome::Found(tags)
            }
            Err(e) => {
                debug!("Unusable ExifTool output for {}: {}", path.display(), e);
                PrimaryOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Decide whether a failure diagnostic allows the fallback backend
pub fn classify_failure(message: String) -> PrimaryOutcome {
    if message.contains(FORMAT_ERROR_MARKER) {
        PrimaryOutcome::FormatUnsupported(message)
    } else {
        PrimaryOutcome::Failed(message)
    }
}

/// Parse `-json` output, unwrapping the one-element array ExifTool emits per file
pub fn parse_exiftool_json(stdout: &[u8]) -> Result<RawAttributes, ToolError> {
    let parsed: Value = serde_json::from_slice(stdout)
        .map_err(|e| ToolError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let record = match parsed {
        Value::Array(records) => {
            if records.len() > 1 {
                warn!("ExifTool returned {} records, using the first", records.len());
            }
            records
                .into_iter()
                .next()
                .ok_or_else(|| ToolError::InvalidOutput("No metadata found".to_string()))?
        }
        other => other,
    };

    match record {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ToolError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use serde_json::json;
    use std::io;
    use std::sync::Mutex;

    struct ScriptedRunner {
        output: io::Result<CommandOutput>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(output: io::Result<CommandOutput>) -> Self {
            Self { output, seen: Mutex::new(Vec::new()) }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
            self.seen.lock().unwrap().push(format!("{} {}", program, args.join(" ")));
            match &self.output {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn output(success: bool, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            success,
            code: Some(if success { 0 } else { 1 }),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_requests_exactly_five_tags() {
        let runner = ScriptedRunner::new(Ok(output(true, "[{}]", "")));
        let extractor = ExifToolExtractor::new("exiftool", &runner);
        extractor.extract(Path::new("/data/in.jpg"));

        let seen = runner.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            ["exiftool -n -json -Orientation -FileType -ImageHeight -ImageWidth -JPEGQualityEstimate /data/in.jpg"]
        );
    }

    #[test]
    fn test_dash_path_is_not_an_option() {
        let runner = ScriptedRunner::new(Ok(output(true, "[{}]", "")));
        let cmd = ExifToolExtractor::new("exiftool", &runner).command(Path::new("-ver"));

        let file_arg = cmd.arguments().last().unwrap();
        assert_eq!(file_arg, "./-ver");
        assert!(!file_arg.starts_with('-'));
    }

    #[test]
    fn test_single_record_is_unwrapped() {
        let stdout = r#"[{"SourceFile":"in.jpg","FileType":"JPEG","ImageHeight":480,"ImageWidth":640,"Orientation":1,"JPEGQualityEstimate":85}]"#;
        let runner = ScriptedRunner::new(Ok(output(true, stdout, "")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("in.jpg"));

        let PrimaryOutcome::Found(tags) = outcome else {
            panic!("expected tags, got {:?}", outcome);
        };
        assert_eq!(tags.len(), 5);
        assert_eq!(tags["FileType"], json!("JPEG"));
        assert!(!tags.contains_key("SourceFile"));
    }

    #[test]
    fn test_bare_object_is_accepted() {
        let tags = parse_exiftool_json(br#"{"FileType":"PNG"}"#).unwrap();
        assert_eq!(tags["FileType"], json!("PNG"));
    }

    #[test]
    fn test_format_error_on_stderr() {
        let runner = ScriptedRunner::new(Ok(output(
            false,
            "",
            "Error: File format error - /tmp/upload_1a2b",
        )));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("/tmp/upload_1a2b"));
        assert!(matches!(outcome, PrimaryOutcome::FormatUnsupported(m) if m.contains("File format error")));
    }

    #[test]
    fn test_format_error_in_json_error_tag() {
        let stdout = r#"[{"SourceFile":"x","Error":"File format error"}]"#;
        let runner = ScriptedRunner::new(Ok(output(false, stdout, "")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert!(matches!(outcome, PrimaryOutcome::FormatUnsupported(_)));
    }

    #[test]
    fn test_error_tag_fails_even_with_zero_exit() {
        let stdout = r#"[{"SourceFile":"x","Error":"File is empty"}]"#;
        let runner = ScriptedRunner::new(Ok(output(true, stdout, "")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert_eq!(outcome, PrimaryOutcome::Failed("File is empty".to_string()));
    }

    #[test]
    fn test_other_failures_are_not_format_errors() {
        let runner = ScriptedRunner::new(Ok(output(false, "", "Permission denied")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert_eq!(outcome, PrimaryOutcome::Failed("Permission denied".to_string()));

        let runner = ScriptedRunner::new(Ok(output(false, "", "")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert!(matches!(outcome, PrimaryOutcome::Failed(m) if m.contains("status")));
    }

    #[test]
    fn test_malformed_output_is_failure() {
        let runner = ScriptedRunner::new(Ok(output(true, "not json", "")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert!(matches!(outcome, PrimaryOutcome::Failed(m) if m.contains("JSON parse error")));

        assert!(parse_exiftool_json(b"[]").is_err());
        assert!(parse_exiftool_json(b"42").is_err());
    }

    #[test]
    fn test_spawn_failure_is_failure() {
        let runner = ScriptedRunner::new(Err(io::Error::new(io::ErrorKind::NotFound, "no exiftool")));
        let outcome = ExifToolExtractor::new("exiftool", &runner).extract(Path::new("x"));
        assert!(matches!(outcome, PrimaryOutcome::Failed(_)));
    }

    #[test]
    fn test_classification_is_substring_based() {
        assert!(matches!(
            classify_failure("File format error: unsupported extension".to_string()),
            PrimaryOutcome::FormatUnsupported(_)
        ));
        assert!(matches!(
            classify_failure("Permission denied".to_string()),
            PrimaryOutcome::Failed(_)
        ));
    }
}
