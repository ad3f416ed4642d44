use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api-f.streamable.com/api/v1";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://streamable.com/";
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 250 * 1024 * 1024;
pub const DEFAULT_MAX_DURATION_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct StreamupConfig {
    pub api: ApiSection,
    pub storage: StorageSection,
    pub limits: LimitsSection,
    pub transfer: TransferSection,
    pub probe: ProbeSection,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub public_base_url: String,
    pub user_agent: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.into(),
            user_agent: concat!("streamup/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub scheme: String,
    pub host_suffix: String,
    pub content_type: String,
    pub sdk_user_agent: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            scheme: "https".into(),
            host_suffix: "s3.amazonaws.com".into(),
            content_type: "application/octet-stream".into(),
            sdk_user_agent: "aws-sdk-js/2.1530.0 callback".into(),
        }
    }
}

impl StorageSection {
    pub fn host_for(&self, bucket: &str) -> String {
        format!("{bucket}.{}", self.host_suffix)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_size_bytes: u64,
    pub max_duration_ms: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    pub chunk_size_bytes: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub ffprobe_path: String,
    pub timeout_seconds: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".into(),
            timeout_seconds: 20,
        }
    }
}

impl ProbeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            request_timeout_seconds: 600,
        }
    }
}

pub fn load_streamup_config<P: AsRef<Path>>(path: P) -> Result<StreamupConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
