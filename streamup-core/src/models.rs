use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageSection;

/// String wrapper for key material. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Temporary storage credentials issued by the negotiation step.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadCredentials {
    #[serde(rename = "accessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    pub secret_access_key: SecretString,
    #[serde(rename = "sessionToken", default)]
    pub session_token: Option<SecretString>,
}

impl UploadCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key),
            session_token: session_token.map(SecretString::new),
        }
    }
}

/// Form fields returned alongside the credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFields {
    pub key: String,
    pub acl: String,
    pub bucket: String,
    #[serde(rename = "X-Amz-Algorithm")]
    pub algorithm: String,
    #[serde(rename = "X-Amz-Credential")]
    pub credential: String,
    #[serde(rename = "X-Amz-Date")]
    pub date: String,
    #[serde(rename = "X-Amz-Security-Token")]
    pub security_token: SecretString,
    #[serde(rename = "Policy")]
    pub policy: String,
    #[serde(rename = "X-Amz-Signature")]
    pub signature: String,
}

impl UploadFields {
    /// Region embedded in `<key>/<date>/<region>/<service>/aws4_request`.
    pub fn region(&self) -> Option<&str> {
        self.credential
            .split('/')
            .nth(2)
            .filter(|region| !region.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub preset: String,
    #[serde(default)]
    pub shortcode: String,
    #[serde(default)]
    pub screenshot: bool,
}

/// Body of the finalize call, echoed back verbatim from negotiation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderOptions {
    pub url: String,
    pub token: SecretString,
    pub shortcode: String,
    pub size: u64,
}

/// Payload returned by `GET /uploads/shortcode`.
#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationPayload {
    #[serde(default)]
    pub accelerated: bool,
    pub bucket: String,
    pub credentials: UploadCredentials,
    pub fields: UploadFields,
    #[serde(default)]
    pub url: String,
    pub options: ProcessingOptions,
    pub shortcode: String,
    pub key: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub transcoder: Option<String>,
    pub transcoder_options: TranscoderOptions,
}

/// Where the storage PUT goes. Immutable once negotiated.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
    pub host: String,
    pub endpoint: String,
    pub fields: UploadFields,
}

impl UploadTarget {
    pub fn new(bucket: String, fields: UploadFields, storage: &StorageSection) -> Self {
        let host = storage.host_for(&bucket);
        let endpoint = format!("{}://{}", storage.scheme, host);
        Self {
            key: fields.key.clone(),
            bucket,
            host,
            endpoint,
            fields,
        }
    }

    /// Object path, always rooted.
    pub fn object_path(&self) -> String {
        format!("/{}", self.key.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Negotiated,
    Initialized,
    Transferring,
    Transferred,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Failed | UploadState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Idle, Negotiated) => true,
            (Negotiated, Initialized) => true,
            (Initialized, Transferring) | (Transferring, Transferring) => true,
            (Transferring, Initialized) | (Transferring, Transferred) => true,
            (Transferred, Finalizing) => true,
            (Finalizing, Transferred) | (Finalizing, Completed) => true,
            (Negotiated, Cancelled) | (Initialized, Cancelled) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadState::Idle => "idle",
            UploadState::Negotiated => "negotiated",
            UploadState::Initialized => "initialized",
            UploadState::Transferring => "transferring",
            UploadState::Transferred => "transferred",
            UploadState::Finalizing => "finalizing",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
            UploadState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Metadata registered by the initialize step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadMetadata {
    pub original_name: String,
    pub original_size: u64,
    pub title: String,
}

/// One in-flight upload. The shortcode is the correlation key for every call after negotiation.
#[derive(Debug, Clone)]
pub struct UploadContext {
    shortcode: String,
    credentials: UploadCredentials,
    target: UploadTarget,
    options: ProcessingOptions,
    transcoder_options: TranscoderOptions,
    source: PathBuf,
    size: u64,
    metadata: Option<UploadMetadata>,
    state: UploadState,
}

impl UploadContext {
    pub fn from_negotiation(
        payload: NegotiationPayload,
        storage: &StorageSection,
        source: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        let target = UploadTarget::new(payload.bucket, payload.fields, storage);
        Self {
            shortcode: payload.shortcode,
            credentials: payload.credentials,
            target,
            options: payload.options,
            transcoder_options: payload.transcoder_options,
            source: source.into(),
            size,
            metadata: None,
            state: UploadState::Idle,
        }
    }

    pub fn shortcode(&self) -> &str {
        &self.shortcode
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    pub fn transcoder_options(&self) -> &TranscoderOptions {
        &self.transcoder_options
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn metadata(&self) -> Option<&UploadMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn credentials(&self) -> &UploadCredentials {
        &self.credentials
    }

    pub(crate) fn set_metadata(&mut self, metadata: UploadMetadata) {
        self.metadata = Some(metadata);
    }

    /// Moves to `next` when the transition is legal; returns `false` otherwise.
    pub(crate) fn advance(&mut self, next: UploadState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanLimits {
    #[serde(default)]
    pub is_exceeding_free_plan_limits: bool,
    #[serde(default)]
    pub is_exceeding_free_plan_duration_limit: bool,
    #[serde(default)]
    pub is_exceeding_free_plan_size_limit: bool,
    #[serde(default)]
    pub should_restrict_playback: bool,
    #[serde(default)]
    pub has_owner_without_plan: bool,
}

/// Response of the finalize call.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoPayload {
    pub shortcode: String,
    #[serde(default)]
    pub date_added: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub plan_limits: PlanLimits,
}

/// Public record of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoRecord {
    pub shortcode: String,
    pub date_added: i64,
    pub url: String,
    pub plan_limits: PlanLimits,
}

impl VideoRecord {
    pub fn from_payload(payload: VideoPayload, public_base_url: &str) -> Self {
        let url = public_url(public_base_url, &payload.shortcode);
        Self {
            shortcode: payload.shortcode,
            date_added: payload.date_added,
            url,
            plan_limits: payload.plan_limits,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.date_added, 0).single()
    }
}

pub fn public_url(public_base_url: &str, shortcode: &str) -> String {
    format!("{}/{}", public_base_url.trim_end_matches('/'), shortcode)
}

/// Body of `POST /videos/{shortcode}/initialize`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InitializeRequest {
    pub original_name: String,
    pub original_size: u64,
    pub title: String,
    pub upload_source: &'static str,
}

impl InitializeRequest {
    pub fn from_metadata(metadata: &UploadMetadata) -> Self {
        Self {
            original_name: metadata.original_name.clone(),
            original_size: metadata.original_size,
            title: metadata.title.clone(),
            upload_source: "web",
        }
    }
}
