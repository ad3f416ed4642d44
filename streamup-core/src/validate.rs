use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{LimitsSection, ProbeSection};

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("{path} size of {size} bytes exceeds maximum allowed size of {max} bytes")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("duration unavailable for {path}: {reason}")]
    DurationUnavailable { path: PathBuf, reason: String },
    #[error("{path} length {duration_ms}ms exceeds maximum allowed length of {max_ms}ms")]
    DurationTooLong {
        path: PathBuf,
        duration_ms: u64,
        max_ms: u64,
    },
    #[error("failed to inspect {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl ValidationError {
    fn unavailable(path: &Path, reason: impl Into<String>) -> Self {
        ValidationError::DurationUnavailable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Reads the playable duration of a media file.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_ms(&self, path: &Path) -> ValidationResult<u64>;
}

/// Duration probe backed by `ffprobe -show_streams -show_format`.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    binary: PathBuf,
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ProbeSection) -> Self {
        Self::new(&config.ffprobe_path, config.timeout())
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration_ms(&self, path: &Path) -> ValidationResult<u64> {
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ValidationError::unavailable(
                    path,
                    format!("{} not found", self.binary.display()),
                ));
            }
            Ok(Err(source)) => {
                return Err(ValidationError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(_) => {
                return Err(ValidationError::unavailable(
                    path,
                    format!("ffprobe timed out after {:?}", self.timeout),
                ));
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(file = %path.display(), "ffprobe returned non-zero status: {stderr}");
            return Err(ValidationError::unavailable(path, "not a decodable media file"));
        }
        parse_ffprobe_duration(&output.stdout)
            .map_err(|reason| ValidationError::unavailable(path, reason))
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Duration of the first video stream, falling back to the container duration.
fn parse_ffprobe_duration(stdout: &[u8]) -> Result<u64, String> {
    let data: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|err| format!("invalid ffprobe payload: {err}"))?;
    let video = data
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream".to_string())?;
    let seconds = video
        .duration
        .as_deref()
        .or(data.format.duration.as_deref())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| "video stream has no duration".to_string())?;
    Ok((seconds * 1000.0).round() as u64)
}

/// Measured properties of a file that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaReport {
    pub size_bytes: u64,
    pub duration_ms: u64,
}

/// Size and duration ceilings enforced before any network call.
#[derive(Clone)]
pub struct ConstraintValidator {
    limits: LimitsSection,
    probe: Arc<dyn DurationProbe>,
}

impl ConstraintValidator {
    pub fn new(limits: LimitsSection, probe: Arc<dyn DurationProbe>) -> Self {
        Self { limits, probe }
    }

    pub fn limits(&self) -> &LimitsSection {
        &self.limits
    }

    pub async fn check_size(&self, path: &Path) -> ValidationResult<u64> {
        let size = file_size(path).await?;
        if size > self.limits.max_size_bytes {
            return Err(ValidationError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                max: self.limits.max_size_bytes,
            });
        }
        Ok(size)
    }

    pub async fn check_duration(&self, path: &Path) -> ValidationResult<u64> {
        file_size(path).await?;
        let duration_ms = self.probe.duration_ms(path).await?;
        if duration_ms > self.limits.max_duration_ms {
            return Err(ValidationError::DurationTooLong {
                path: path.to_path_buf(),
                duration_ms,
                max_ms: self.limits.max_duration_ms,
            });
        }
        Ok(duration_ms)
    }

    /// Runs the size check, then the duration check.
    pub async fn check(&self, path: &Path) -> ValidationResult<MediaReport> {
        let size_bytes = self.check_size(path).await?;
        let duration_ms = self.check_duration(path).await?;
        Ok(MediaReport {
            size_bytes,
            duration_ms,
        })
    }
}

/// Size of a regular file, without enforcing any limit.
pub async fn file_size(path: &Path) -> ValidationResult<u64> {
    let metadata = tokio::fs::metadata(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ValidationError::FileNotFound(path.to_path_buf())
        } else {
            ValidationError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }
    Ok(metadata.len())
}
