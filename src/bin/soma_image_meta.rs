// soma_image_meta - BODY organ binary
// One-shot metadata probe, or a daemon serving the organ over a Unix Domain Socket

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use soma_image_meta::organ::{MetadataOrgan, Organ, Response, Stimulus};
use soma_image_meta::{ExtractorConfig, MetadataExtractor};

/// Largest request frame the daemon accepts
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "soma_image_meta", version, about = "SOMA Image Metadata - ExifTool/ImageMagick organ")]
struct Args {
    /// ExifTool executable
    #[arg(long, env = "SOMA_EXIFTOOL", default_value = "exiftool")]
    exiftool: String,

    /// ImageMagick executable
    #[arg(long, env = "SOMA_MAGICK", default_value = "magick")]
    magick: String,

    /// Kill a tool invocation after this many seconds (0 = never)
    #[arg(long, env = "SOMA_TOOL_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print metadata of each file as one JSON line
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Files extracted concurrently
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    /// Serve the organ on a Unix socket
    Serve {
        #[arg(long, default_value = "/tmp/soma_image_meta.sock")]
        socket_path: PathBuf,
    },
}

impl Args {
    fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            exiftool_path: self.exiftool.clone(),
            magick_path: self.magick.clone(),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; probe output owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let extractor = MetadataExtractor::new(args.extractor_config());

    match args.command {
        Commands::Probe { files, jobs } => {
            let failures = probe(extractor, files, jobs, &mut std::io::stdout().lock()).await?;
            Ok(ExitCode::from(probe_exit_code(failures)))
        }
        Commands::Serve { socket_path } => {
            serve(extractor, socket_path).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Extract every file with at most `jobs` in flight; output keeps input order
async fn probe(
    extractor: MetadataExtractor,
    files: Vec<PathBuf>,
    jobs: usize,
    out: &mut impl Write,
) -> Result<usize> {
    let extractor = Arc::new(extractor);
    let permits = Arc::new(Semaphore::new(jobs.max(1)));

    let mut handles = Vec::with_capacity(files.len());
    for file in files {
        let extractor = Arc::clone(&extractor);
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            let path = file.clone();
            let result = tokio::task::spawn_blocking(move || extractor.extract_with_backend(&path)).await?;
            Ok::<_, anyhow::Error>((file, result))
        }));
    }

    let mut failures = 0;
    for handle in handles {
        let (file, result) = handle.await.context("Probe task panicked")??;
        let line = match result {
            Ok(extraction) => json!({
                "file": file.display().to_string(),
                "metadata": extraction.metadata,
                "backend": extraction.backend,
            }),
            Err(e) => {
                failures += 1;
                error!("{}", e);
                json!({
                    "file": file.display().to_string(),
                    "error": e.to_string(),
                })
            }
        };
        writeln!(out, "{}", line)?;
    }

    Ok(failures)
}

/// Non-zero when any file failed
fn probe_exit_code(failures: usize) -> u8 {
    if failures > 0 { 1 } else { 0 }
}

async fn serve(extractor: MetadataExtractor, socket_path: PathBuf) -> Result<()> {
    let config = extractor.config();
    info!("🖼️  Starting SOMA Image Metadata Daemon");
    info!("   Socket: {}", socket_path.display());
    info!("   Tools: {} / {} (timeout {:?})", config.exiftool_path, config.magick_path, config.timeout);

    let start_time = std::time::Instant::now();
    let organ = Arc::new(MetadataOrgan::with_extractor(extractor));

    // Remove old socket if exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .context("Failed to remove old socket")?;
    }

    let listener = UnixListener::bind(&socket_path)
        .context("Failed to bind Unix socket")?;

    info!("   ✓ Listening on {}", socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let organ = Arc::clone(&organ);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, organ, start_time).await {
                        error!("Connection error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Length-prefixed JSON request/response loop for one client
async fn handle_connection<S>(
    mut stream: S,
    organ: Arc<MetadataOrgan>,
    start_time: std::time::Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Request frame of {} bytes exceeds limit", len);
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        let stimulus: Stimulus = serde_json::from_slice(&body)
            .context("Failed to parse stimulus")?;

        debug!("Received: op={}", stimulus.op);

        let response = if stimulus.op == "health" || stimulus.op == "health.check" {
            Response {
                ok: true,
                output: json!({
                    "status": "healthy",
                    "organ": "soma_image_meta",
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": start_time.elapsed().as_millis() as u64,
                }),
                latency_ms: 0,
                cost: None,
            }
        } else {
            match organ.stimulate(stimulus).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Stimulate error: {}", e);
                    Response {
                        ok: false,
                        output: json!({ "error": e.to_string() }),
                        latency_ms: 0,
                        cost: None,
                    }
                }
            }
        };

        let response_bytes = serde_json::to_vec(&response)
            .context("Failed to serialize response")?;

        stream.write_all(&(response_bytes.len() as u32).to_be_bytes()).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        debug!("Sent: ok={}, latency={}ms", response.ok, response.latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_image_meta::{CommandOutput, CommandRunner};
    use std::sync::Mutex;
    use tokio::net::UnixStream;

    /// exiftool stand-in: files named `bad*` fail, everything else is a PNG
    #[derive(Default)]
    struct ExifToolStub {
        calls: Mutex<usize>,
    }

    impl CommandRunner for ExifToolStub {
        fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            *self.calls.lock().unwrap() += 1;
            let file = args.last().cloned().unwrap_or_default();
            if file.contains("bad") {
                return Ok(CommandOutput {
                    success: false,
                    code: Some(1),
                    stderr: b"Permission denied".to_vec(),
                    ..Default::default()
                });
            }
            Ok(CommandOutput {
                success: true,
                code: Some(0),
                stdout: json!([{"FileType": "PNG", "ImageWidth": 4, "ImageHeight": 3}]).to_string().into_bytes(),
                stderr: Vec::new(),
            })
        }
    }

    fn stub_extractor(stub: &Arc<ExifToolStub>) -> MetadataExtractor {
        MetadataExtractor::with_runner(ExtractorConfig::default(), stub.clone())
    }

    async fn write_frame(stream: &mut UnixStream, body: &[u8]) {
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn read_response(stream: &mut UnixStream) -> Response {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let args = Args::try_parse_from(["soma_image_meta", "--timeout-secs", "0", "probe", "a.jpg"]).unwrap();
        assert_eq!(args.extractor_config().timeout, None);

        let args = Args::try_parse_from(["soma_image_meta", "--timeout-secs", "5", "probe", "a.jpg"]).unwrap();
        assert_eq!(args.extractor_config().timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_file_list_is_required() {
        assert!(Args::try_parse_from(["soma_image_meta", "probe"]).is_err());
    }

    #[tokio::test]
    async fn test_results_keep_input_order_and_count_failures() {
        let stub = Arc::new(ExifToolStub::default());
        let files: Vec<PathBuf> = ["one.png", "bad.png", "three.png"].iter().map(PathBuf::from).collect();
        let mut out = Vec::new();

        let failures = probe(stub_extractor(&stub), files, 2, &mut out).await.unwrap();

        assert_eq!(failures, 1);
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["file"], "one.png");
        assert_eq!(lines[0]["metadata"]["ImageWidth"], 4);
        assert_eq!(lines[0]["backend"], "ExifTool");
        assert_eq!(lines[1]["file"], "bad.png");
        assert!(lines[1]["error"].as_str().unwrap().contains("Permission denied"));
        assert_eq!(lines[2]["file"], "three.png");
    }

    #[test]
    fn test_exit_code_reflects_failures() {
        assert_eq!(probe_exit_code(0), 0);
        assert_eq!(probe_exit_code(2), 1);
    }

    #[tokio::test]
    async fn test_connection_answers_framed_requests() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let stub = Arc::new(ExifToolStub::default());
        let organ = Arc::new(MetadataOrgan::with_extractor(stub_extractor(&stub)));
        let (mut client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(handle_connection(server, organ, std::time::Instant::now()));

        let request = json!({"op": "image.metadata", "input": {"input_path": file.path()}});
        write_frame(&mut client, request.to_string().as_bytes()).await;
        let response = read_response(&mut client).await;
        assert!(response.ok, "{}", response.output);
        assert_eq!(response.output["metadata"]["FileType"], "PNG");

        let request = json!({"op": "media.capabilities", "input": {}});
        write_frame(&mut client, request.to_string().as_bytes()).await;
        assert!(read_response(&mut client).await.ok);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_bypasses_organ() {
        let stub = Arc::new(ExifToolStub::default());
        let organ = Arc::new(MetadataOrgan::with_extractor(stub_extractor(&stub)));
        let (mut client, server) = UnixStream::pair().unwrap();
        tokio::spawn(handle_connection(server, Arc::clone(&organ), std::time::Instant::now()));

        write_frame(&mut client, br#"{"op": "health", "input": {}}"#).await;
        let response = read_response(&mut client).await;

        assert!(response.ok);
        assert_eq!(response.output["status"], "healthy");
        assert_eq!(organ.metrics().snapshot().total_requests, 0);
        assert_eq!(*stub.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let organ = Arc::new(MetadataOrgan::with_extractor(stub_extractor(&Arc::default())));
        let (mut client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(handle_connection(server, organ, std::time::Instant::now()));

        let len = (MAX_FRAME_LEN as u32) + 1;
        client.write_all(&len.to_be_bytes()).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }
}
