/*!
 * upstream-s3 CLI - stream stdin (or a file) into a multipart upload
 *
 * Ctrl-C cancels the upload; the partially uploaded parts are aborted on the
 * store before the process exits.
 */

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use upstream_s3::{
    config::{AppConfig, EmptyFinalPart, LogLevel, StreamConfig},
    error::{UploadError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
    protocol::{
        s3::{S3Client, S3Config},
        MemoryMultipartStore, MultipartOperations, ServerSideEncryption, StorageClass,
    },
    stream::{UploadEvent, UploadEventKind, UploadState, UploadStream, UploadSummary},
};

const MIB: usize = 1024 * 1024;
const READ_CHUNK: usize = MIB;

#[derive(Parser)]
#[command(name = "upstream-s3")]
#[command(version, about = "Stream bytes into an S3 multipart upload", long_about = None)]
struct Cli {
    /// Target bucket
    #[arg(short = 'b', long)]
    bucket: String,

    /// Target object key
    #[arg(short = 'k', long)]
    key: String,

    /// Read from this file instead of stdin ("-" means stdin)
    #[arg(short = 'i', long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// TOML configuration file with [stream], [s3] and [logging] tables
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack, ...)
    #[arg(long)]
    endpoint: Option<String>,

    /// Use path-style addressing
    #[arg(long)]
    path_style: bool,

    /// AWS profile name
    #[arg(long)]
    profile: Option<String>,

    /// Content-Type of the object
    #[arg(long)]
    content_type: Option<String>,

    /// Cache-Control of the object
    #[arg(long)]
    cache_control: Option<String>,

    /// Canned ACL
    #[arg(long)]
    acl: Option<String>,

    /// Storage class (STANDARD, STANDARD_IA, INTELLIGENT_TIERING, ...)
    #[arg(long, value_parser = parse_storage_class)]
    storage_class: Option<StorageClass>,

    /// Server-side encryption
    #[arg(long, value_enum)]
    sse: Option<SseArg>,

    /// KMS key id for --sse aws-kms
    #[arg(long, requires = "sse")]
    kms_key_id: Option<String>,

    /// User metadata as KEY=VALUE (repeatable)
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    /// Part size in MiB (minimum 5)
    #[arg(long, value_name = "MIB")]
    part_size: Option<usize>,

    /// Buffer ceiling in MiB (parts are sized by --part-size, not by this)
    #[arg(long, value_name = "MIB")]
    buffer_size: Option<usize>,

    /// Lock acquisition timeout in milliseconds
    #[arg(long, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Do not send a zero-length final part
    #[arg(long)]
    skip_empty_final_part: bool,

    /// Upload into an in-memory store instead of S3
    #[arg(long)]
    dry_run: bool,

    /// Print the upload summary as JSON
    #[arg(long)]
    json: bool,

    /// Hide the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SseArg {
    None,
    Aes256,
    AwsKms,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn parse_storage_class(s: &str) -> Result<StorageClass, String> {
    s.parse()
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<UploadError>()
                .map(UploadError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };

    let mut log_config = app.logging.clone();
    if let Some(level) = cli.log_level {
        log_config.log_level = level.into();
    }
    if cli.log.is_some() {
        log_config.log_file = cli.log.clone();
    }
    log_config.verbose |= cli.verbose;
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let stream_config = stream_config(&cli, app.stream.clone())?;
    let s3_config = s3_config(&cli, app.s3.clone().unwrap_or_default())?;

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let summary = runtime.block_on(upload(&cli, stream_config, s3_config))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.state == UploadState::Aborted {
        return Err(UploadError::Cancelled.into());
    }
    Ok(())
}

fn stream_config(cli: &Cli, mut config: StreamConfig) -> anyhow::Result<StreamConfig> {
    if let Some(mib) = cli.part_size {
        config.min_part_size = mib * MIB;
        config.buffer_capacity = config.buffer_capacity.max(config.min_part_size);
    }
    if let Some(mib) = cli.buffer_size {
        config.buffer_capacity = mib * MIB;
    }
    if let Some(ms) = cli.lock_timeout_ms {
        config.lock_timeout_ms = ms;
    }
    if cli.skip_empty_final_part {
        config.empty_final_part = EmptyFinalPart::Skip;
    }
    config.validate()?;
    Ok(config)
}

fn s3_config(cli: &Cli, mut config: S3Config) -> anyhow::Result<S3Config> {
    if cli.region.is_some() {
        config.region = cli.region.clone();
    }
    if cli.endpoint.is_some() {
        config.endpoint = cli.endpoint.clone();
    }
    if cli.profile.is_some() {
        config.aws_profile = cli.profile.clone();
    }
    config.force_path_style |= cli.path_style;

    if cli.content_type.is_some() {
        config.content_type = cli.content_type.clone();
    }
    if cli.cache_control.is_some() {
        config.cache_control = cli.cache_control.clone();
    }
    if cli.acl.is_some() {
        config.acl = cli.acl.clone();
    }
    if let Some(class) = cli.storage_class {
        config.storage_class = class;
    }
    match cli.sse {
        Some(SseArg::None) => config.server_side_encryption = ServerSideEncryption::None,
        Some(SseArg::Aes256) => config.server_side_encryption = ServerSideEncryption::Aes256,
        Some(SseArg::AwsKms) => {
            config.server_side_encryption = ServerSideEncryption::AwsKms {
                key_id: cli.kms_key_id.clone(),
            }
        }
        None => {}
    }
    if cli.kms_key_id.is_some() && cli.sse != Some(SseArg::AwsKms) {
        bail!("--kms-key-id requires --sse aws-kms");
    }
    config
        .user_metadata
        .extend(cli.metadata.iter().cloned().collect::<HashMap<_, _>>());

    config.validate()?;
    Ok(config)
}

async fn upload(
    cli: &Cli,
    stream_config: StreamConfig,
    s3_config: S3Config,
) -> anyhow::Result<UploadSummary> {
    let client: Arc<dyn MultipartOperations> = if cli.dry_run {
        info!("Dry run: uploading into an in-memory store");
        Arc::new(
            MemoryMultipartStore::new()
                .with_encryption(s3_config.server_side_encryption.clone()),
        )
    } else {
        Arc::new(S3Client::new(s3_config.clone()).await?)
    };

    let request = s3_config.initiate_request(&cli.bucket, &cli.key);
    let stream = Arc::new(
        UploadStream::builder(client)
            .request(request)
            .config(stream_config)
            .build()?,
    );

    let progress = spawn_progress(&stream, cli.json || cli.no_progress);

    let ctrl_c = {
        let stream = stream.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; cancelling upload");
                stream.cancel();
            }
        })
    };

    let mut input: Box<dyn AsyncRead + Unpin + Send> = match &cli.input {
        Some(path) if path.as_os_str() != "-" => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        _ => Box::new(tokio::io::stdin()),
    };

    let transferred = transfer(&mut *input, &stream).await;

    ctrl_c.abort();
    if let Some(handle) = progress {
        handle.abort();
    }

    transferred?;
    Ok(stream.summary().await?)
}

/// Pump `input` into the stream, then close it.
///
/// When the input cannot be read to the end the stream is cancelled first, so
/// close aborts the upload instead of publishing a truncated object.
async fn transfer(
    input: &mut (dyn AsyncRead + Unpin + Send),
    stream: &UploadStream,
) -> anyhow::Result<()> {
    let pumped = pump(input, stream).await;
    if let Err(e) = &pumped {
        warn!(error = %e, "Transfer failed; aborting upload");
        stream.cancel();
    }
    let closed = stream.close().await;

    pumped?;
    closed?;
    Ok(())
}

/// Copy `input` into the stream until EOF or cancellation
async fn pump(
    input: &mut (dyn AsyncRead + Unpin + Send),
    stream: &UploadStream,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        if stream.is_cancelled() {
            return Ok(());
        }
        let n = input.read(&mut buf).await.context("reading input")?;
        if n == 0 {
            return Ok(());
        }
        match stream.write(&buf[..n]).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn spawn_progress(stream: &UploadStream, hidden: bool) -> Option<tokio::task::JoinHandle<()>> {
    if hidden {
        return None;
    }

    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {bytes} uploaded ({bytes_per_sec}) {msg}")
    {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut events = stream.subscribe(&[
        UploadEventKind::PartUploaded,
        UploadEventKind::TransferProgress,
        UploadEventKind::Completed,
        UploadEventKind::Aborted,
    ]);

    Some(tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::TransferProgress { bytes, .. } => bar.inc(bytes),
                UploadEvent::PartUploaded(part) => {
                    bar.set_message(format!("part {}", part.part_number))
                }
                UploadEvent::Completed(_) => {
                    bar.finish_with_message("completed");
                    break;
                }
                UploadEvent::Aborted(_) => {
                    bar.abandon_with_message("aborted");
                    break;
                }
                UploadEvent::Initiated(_) => {}
            }
        }
    }))
}

fn print_summary(summary: &UploadSummary) {
    println!("s3://{}/{}", summary.bucket, summary.key);
    println!("  state:    {}", summary.state);
    if let Some(id) = &summary.upload_id {
        println!("  upload:   {}", id);
    }
    println!("  parts:    {}", summary.parts);
    println!("  bytes:    {}", summary.bytes_uploaded);
    if let Some(etag) = &summary.etag {
        println!("  etag:     {}", etag);
    }
    if let Some(location) = &summary.location {
        println!("  location: {}", location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::ReadBuf;
    use upstream_s3::error::EXIT_ABORTED;

    /// Serves one chunk, then fails like a dropped pipe
    struct BrokenInput {
        served: bool,
    }

    impl AsyncRead for BrokenInput {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "input went away",
                )));
            }
            self.served = true;
            buf.put_slice(&[5u8; 4096]);
            Poll::Ready(Ok(()))
        }
    }

    fn memory_stream(store: &Arc<MemoryMultipartStore>) -> UploadStream {
        UploadStream::builder(store.clone())
            .bucket("cli-bucket")
            .key("piped.bin")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_transfer_aborts_when_input_fails() {
        let store = Arc::new(MemoryMultipartStore::new());
        let stream = memory_stream(&store);
        let mut input = BrokenInput { served: false };

        let err = transfer(&mut input, &stream).await.unwrap_err();
        assert!(format!("{:#}", err).contains("reading input"));

        assert_eq!(stream.state(), UploadState::Aborted);
        assert!(store.object("cli-bucket", "piped.bin").is_none());
        assert_eq!(store.pending_uploads(), 0);
        assert_eq!(store.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_transfer_completes_clean_input() {
        let store = Arc::new(MemoryMultipartStore::new());
        let stream = memory_stream(&store);
        let mut input: &[u8] = b"whole input";

        transfer(&mut input, &stream).await.unwrap();

        assert_eq!(stream.state(), UploadState::Completed);
        assert_eq!(
            store.object("cli-bucket", "piped.bin").unwrap(),
            &b"whole input"[..]
        );
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("team=data").unwrap(),
            ("team".to_string(), "data".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_overrides_stream_config() {
        let cli = Cli::parse_from([
            "upstream-s3",
            "--bucket",
            "my-bucket",
            "--key",
            "k",
            "--part-size",
            "8",
            "--skip-empty-final-part",
        ]);
        let config = stream_config(&cli, StreamConfig::default()).unwrap();
        assert_eq!(config.min_part_size, 8 * MIB);
        assert_eq!(config.buffer_capacity, 15 * MIB);
        assert_eq!(config.empty_final_part, EmptyFinalPart::Skip);
    }

    #[test]
    fn test_cli_rejects_small_part_size() {
        let cli = Cli::parse_from(["upstream-s3", "-b", "my-bucket", "-k", "k", "--part-size", "1"]);
        assert!(stream_config(&cli, StreamConfig::default()).is_err());
    }

    #[test]
    fn test_cli_overrides_s3_config() {
        let cli = Cli::parse_from([
            "upstream-s3",
            "-b",
            "my-bucket",
            "-k",
            "k",
            "--sse",
            "aws-kms",
            "--kms-key-id",
            "alias/x",
            "--metadata",
            "a=1",
            "--storage-class",
            "standard-ia",
        ]);
        let config = s3_config(&cli, S3Config::default()).unwrap();
        assert_eq!(
            config.server_side_encryption,
            ServerSideEncryption::AwsKms {
                key_id: Some("alias/x".to_string())
            }
        );
        assert_eq!(config.storage_class, StorageClass::StandardIa);
        assert_eq!(config.user_metadata.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_exit_code_for_cancellation() {
        let err: anyhow::Error = UploadError::Cancelled.into();
        assert_eq!(
            err.downcast_ref::<UploadError>().map(UploadError::exit_code),
            Some(EXIT_ABORTED)
        );
    }
}
