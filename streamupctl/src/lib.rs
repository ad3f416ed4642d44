use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use streamup_core::{
    load_streamup_config, ConstraintValidator, FfprobeDurationProbe, HttpSession, MediaReport,
    PipelineError, ProgressObserver, StreamupConfig, TransportError, UploadError,
    UploadOrchestrator, ValidationError, VideoRecord,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamup_core::ConfigError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Upload(#[from] UploadError),
    #[error(
        "upload {shortcode} failed: {source}; the remote record was kept, \
         run `streamupctl cancel {shortcode}` to discard it"
    )]
    UploadIncomplete {
        shortcode: String,
        source: UploadError,
    },
    #[error("http client error: {0}")]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        match error.context {
            Some(context) => AppError::UploadIncomplete {
                shortcode: context.shortcode().to_string(),
                source: error.source,
            },
            None => AppError::Upload(error.source),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload videos from the command line", long_about = None)]
pub struct Cli {
    /// Path to streamup.toml; built-in defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Checks a file against the size and duration limits without uploading it
    Check(CheckArgs),
    /// Uploads a video and prints its public record
    Upload(UploadArgs),
    /// Discards a pending upload by shortcode
    Cancel(CancelArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub file: PathBuf,
    /// Title for the video; defaults to the file name without extension
    #[arg(long)]
    pub title: Option<String>,
    /// Session cookie (`name=value`) of a logged-in account
    #[arg(long)]
    pub session_cookie: Option<String>,
    /// Suppress progress output
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct CancelArgs {
    pub shortcode: String,
    /// Session cookie (`name=value`) of a logged-in account
    #[arg(long)]
    pub session_cookie: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Check(args) => {
            let report = check(&config, &args.file).await?;
            render(&report, cli.format)?;
        }
        Commands::Upload(args) => {
            let record = upload(config, args).await?;
            render(&record, cli.format)?;
        }
        Commands::Cancel(args) => {
            let report = cancel(config, args).await?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<StreamupConfig> {
    match path {
        Some(path) => {
            let config = load_streamup_config(path)?;
            tracing::debug!(config = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(StreamupConfig::default()),
    }
}

async fn check(config: &StreamupConfig, file: &Path) -> Result<CheckReport> {
    let probe = Arc::new(FfprobeDurationProbe::from_config(&config.probe));
    let validator = ConstraintValidator::new(config.limits.clone(), probe);
    let report = validator.check(file).await?;
    Ok(CheckReport::new(file, report, config))
}

async fn upload(config: StreamupConfig, args: &UploadArgs) -> Result<VideoRecord> {
    let session = HttpSession::new(&config)?;
    let orchestrator = UploadOrchestrator::new(config)?;
    let session = match &args.session_cookie {
        Some(cookie) => session.with_cookie(cookie, orchestrator.endpoints().base()),
        None => session,
    };
    let observer: Option<Arc<dyn ProgressObserver>> = if args.quiet {
        None
    } else {
        Some(Arc::new(ConsoleProgress::default()))
    };
    let record = orchestrator
        .upload_video(&session, &args.file, args.title.as_deref(), observer)
        .await?;
    Ok(record)
}

async fn cancel(config: StreamupConfig, args: &CancelArgs) -> Result<CancelReport> {
    let session = HttpSession::new(&config)?;
    let orchestrator = UploadOrchestrator::new(config)?;
    let session = match &args.session_cookie {
        Some(cookie) => session.with_cookie(cookie, orchestrator.endpoints().base()),
        None => session,
    };
    orchestrator
        .cancel_shortcode(&session, &args.shortcode)
        .await?;
    Ok(CancelReport {
        shortcode: args.shortcode.clone(),
        cancelled: true,
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

/// Prints whole-percent progress to stderr.
#[derive(Debug)]
struct ConsoleProgress {
    last: AtomicI64,
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self {
            last: AtomicI64::new(-1),
        }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, percent: f64) {
        let whole = percent.floor() as i64;
        if self.last.fetch_max(whole, Ordering::Relaxed) < whole {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\ruploading... {whole:>3}%");
            let _ = stderr.flush();
        }
    }

    fn on_complete(&self) {
        eprintln!();
    }
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub file: PathBuf,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    pub duration_ms: u64,
    pub max_duration_ms: u64,
}

impl CheckReport {
    fn new(file: &Path, report: MediaReport, config: &StreamupConfig) -> Self {
        Self {
            file: file.to_path_buf(),
            size_bytes: report.size_bytes,
            max_size_bytes: config.limits.max_size_bytes,
            duration_ms: report.duration_ms,
            max_duration_ms: config.limits.max_duration_ms,
        }
    }
}

impl DisplayFallback for CheckReport {
    fn display(&self) -> String {
        [
            format!("{}: ok", self.file.display()),
            format!("  size: {} / {} bytes", self.size_bytes, self.max_size_bytes),
            format!(
                "  duration: {:.1} / {:.1} s",
                self.duration_ms as f64 / 1000.0,
                self.max_duration_ms as f64 / 1000.0
            ),
        ]
        .join("\n")
    }
}

impl DisplayFallback for VideoRecord {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} {}", self.shortcode, self.url)];
        if let Some(created) = self.created_at() {
            lines.push(format!("  added: {}", created.to_rfc3339()));
        }
        let limits = &self.plan_limits;
        if limits.is_exceeding_free_plan_limits {
            let mut reasons = Vec::new();
            if limits.is_exceeding_free_plan_size_limit {
                reasons.push("size");
            }
            if limits.is_exceeding_free_plan_duration_limit {
                reasons.push("duration");
            }
            lines.push(format!("  exceeds free plan limits: {}", reasons.join(", ")));
        }
        if limits.should_restrict_playback {
            lines.push("  playback restricted".to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CancelReport {
    pub shortcode: String,
    pub cancelled: bool,
}

impl DisplayFallback for CancelReport {
    fn display(&self) -> String {
        format!("{} cancelled", self.shortcode)
    }
}
