use std::fmt;

use thiserror::Error;

use crate::models::{UploadContext, UploadState};
use crate::session::TransportError;
use crate::signing::SigningError;
use crate::validate::ValidationError;

/// Remote call that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Negotiate,
    Initialize,
    Transfer,
    Finalize,
    Cancel,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStep::Negotiate => "negotiate",
            UploadStep::Initialize => "initialize",
            UploadStep::Transfer => "transfer",
            UploadStep::Finalize => "finalize",
            UploadStep::Cancel => "cancel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("{step} rejected with status {status}: {body}")]
    RemoteRejected {
        step: UploadStep,
        status: u16,
        body: String,
    },
    #[error("{step} transport failure: {source}")]
    Transport {
        step: UploadStep,
        source: TransportError,
    },
    #[error("{step} returned an invalid response: {reason}")]
    InvalidResponse { step: UploadStep, reason: String },
    #[error("cannot {operation} upload {shortcode} in state {state}")]
    InvalidState {
        operation: UploadStep,
        shortcode: String,
        state: UploadState,
    },
    #[error("shortcode {0} is already in use by an active upload")]
    ShortcodeInUse(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UploadError {
    pub(crate) fn transport(step: UploadStep, source: impl Into<TransportError>) -> Self {
        UploadError::Transport {
            step,
            source: source.into(),
        }
    }

    pub(crate) fn invalid_response(step: UploadStep, reason: impl fmt::Display) -> Self {
        UploadError::InvalidResponse {
            step,
            reason: reason.to_string(),
        }
    }

    /// Whether the same step may be retried with the same context.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            UploadError::RemoteRejected { .. } | UploadError::Transport { .. }
        )
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Failure of the composed pipeline. `context` is kept once the remote record exists past
/// initialization, so the caller can retry `transfer`/`finalize` or cancel.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct PipelineError {
    #[source]
    pub source: UploadError,
    pub context: Option<UploadContext>,
}

impl PipelineError {
    pub fn new(source: UploadError, context: Option<UploadContext>) -> Self {
        Self { source, context }
    }

    pub fn shortcode(&self) -> Option<&str> {
        self.context.as_ref().map(UploadContext::shortcode)
    }
}

impl From<UploadError> for PipelineError {
    fn from(source: UploadError) -> Self {
        Self::new(source, None)
    }
}
