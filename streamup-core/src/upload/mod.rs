//! Upload pipeline: negotiate, initialize, transfer, finalize.
//!
//! Each step takes the caller's [`Session`] explicitly and mutates the [`UploadContext`] in
//! place, so a failed step can be retried with the same context.

mod endpoints;
mod error;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::StreamupConfig;
use crate::models::{
    InitializeRequest, NegotiationPayload, UploadContext, UploadMetadata, UploadState,
    VideoPayload, VideoRecord,
};
use crate::session::{Session, SessionRequest, SessionResponse};
use crate::signing::{build_upload_headers, TimestampPolicy};
use crate::transfer::{ProgressObserver, StreamingTransfer};
use crate::validate::{self, ConstraintValidator, DurationProbe, FfprobeDurationProbe};

pub use endpoints::ApiEndpoints;
pub use error::{PipelineError, UploadError, UploadResult, UploadStep};

/// Status codes `cancel` treats as "already discarded".
const GONE_STATUSES: [u16; 2] = [404, 410];

pub struct UploadOrchestrator {
    config: StreamupConfig,
    endpoints: ApiEndpoints,
    validator: ConstraintValidator,
    transfer: StreamingTransfer,
    timestamp_policy: TimestampPolicy,
    active: Mutex<HashSet<String>>,
}

impl UploadOrchestrator {
    pub fn new(config: StreamupConfig) -> UploadResult<Self> {
        let endpoints = ApiEndpoints::parse(&config.api.base_url)?;
        let probe = Arc::new(FfprobeDurationProbe::from_config(&config.probe));
        let validator = ConstraintValidator::new(config.limits.clone(), probe);
        let transfer = StreamingTransfer::new(config.transfer.chunk_size_bytes);
        Ok(Self {
            config,
            endpoints,
            validator,
            transfer,
            timestamp_policy: TimestampPolicy::Now,
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Replaces the ffprobe-backed duration probe.
    pub fn with_probe(mut self, probe: Arc<dyn DurationProbe>) -> Self {
        self.validator = ConstraintValidator::new(self.config.limits.clone(), probe);
        self
    }

    /// Overrides the `x-amz-date` source for storage PUTs. Defaults to [`TimestampPolicy::Now`].
    pub fn with_timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = policy;
        self
    }

    pub fn config(&self) -> &StreamupConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub fn validator(&self) -> &ConstraintValidator {
        &self.validator
    }

    pub fn is_active(&self, shortcode: &str) -> bool {
        self.registry().contains(shortcode)
    }

    pub async fn negotiate(
        &self,
        session: &dyn Session,
        path: &Path,
    ) -> UploadResult<UploadContext> {
        let size = validate::file_size(path).await?;
        let step = UploadStep::Negotiate;
        let request = SessionRequest::get(self.endpoints.shortcode(size));
        let response = send(session, step, request).await?;
        let payload: NegotiationPayload = serde_json::from_slice(&response.body)
            .map_err(|err| UploadError::invalid_response(step, err))?;
        if payload.shortcode.is_empty() {
            return Err(UploadError::invalid_response(step, "empty shortcode"));
        }
        if !self.registry().insert(payload.shortcode.clone()) {
            return Err(UploadError::ShortcodeInUse(payload.shortcode));
        }

        let mut context =
            UploadContext::from_negotiation(payload, &self.config.storage, path, size);
        context.advance(UploadState::Negotiated);
        info!(
            shortcode = context.shortcode(),
            bucket = %context.target().bucket,
            size,
            "upload negotiated"
        );
        Ok(context)
    }

    /// Registers file metadata with the remote record. `title` defaults to the file stem.
    pub async fn initialize(
        &self,
        session: &dyn Session,
        context: &mut UploadContext,
        title: Option<&str>,
    ) -> UploadResult<()> {
        let step = UploadStep::Initialize;
        require_state(context, step, &[UploadState::Negotiated])?;

        let source = context.source();
        let original_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = title
            .filter(|title| !title.is_empty())
            .map(str::to_owned)
            .or_else(|| {
                source
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| original_name.clone());
        let metadata = UploadMetadata {
            original_name,
            original_size: context.size(),
            title,
        };

        let request = SessionRequest::post(self.endpoints.initialize(context.shortcode()))
            .json(&InitializeRequest::from_metadata(&metadata))?;
        send(session, step, request).await?;

        context.set_metadata(metadata);
        context.advance(UploadState::Initialized);
        info!(shortcode = context.shortcode(), "upload initialized");
        Ok(())
    }

    /// Streams `path` to storage with freshly signed headers.
    ///
    /// Transport failures and storage rejections leave the context `Initialized`; calling
    /// `transfer` again resumes without renegotiating.
    pub async fn transfer(
        &self,
        session: &dyn Session,
        context: &mut UploadContext,
        path: &Path,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> UploadResult<()> {
        let step = UploadStep::Transfer;
        require_state(context, step, &[UploadState::Initialized])?;

        let chunks = self
            .transfer
            .open(path, observer)
            .await
            .map_err(|err| UploadError::transport(step, err))?;
        let length = chunks.len();
        let signed = match build_upload_headers(
            context,
            &self.config.storage,
            length,
            self.timestamp_policy,
        ) {
            Ok(signed) => signed,
            Err(err) => return Err(self.fail(context, step, err.into())),
        };

        context.advance(UploadState::Transferring);
        debug!(
            shortcode = context.shortcode(),
            bytes = length,
            chunk_size = self.transfer.chunk_size(),
            "streaming to storage"
        );
        let request = SessionRequest::new(reqwest::Method::PUT, signed.url)
            .headers(signed.headers)
            .stream(length, Box::pin(chunks));
        match send(session, step, request).await {
            Ok(_) => {
                context.advance(UploadState::Transferred);
                info!(
                    shortcode = context.shortcode(),
                    bytes = length,
                    "storage transfer completed"
                );
                Ok(())
            }
            Err(err) => {
                context.advance(UploadState::Initialized);
                warn!(
                    shortcode = context.shortcode(),
                    error = %err,
                    "storage transfer failed; upload remains resumable"
                );
                Err(err)
            }
        }
    }

    /// Triggers post-processing. Returns once the remote side has accepted the job, not
    /// when transcoding is done.
    pub async fn finalize(
        &self,
        session: &dyn Session,
        context: &mut UploadContext,
    ) -> UploadResult<VideoRecord> {
        let step = UploadStep::Finalize;
        require_state(context, step, &[UploadState::Transferred])?;

        let request = SessionRequest::post(self.endpoints.transcode(context.shortcode()))
            .json(context.transcoder_options())?;
        context.advance(UploadState::Finalizing);
        let response = match send(session, step, request).await {
            Ok(response) => response,
            Err(err) => {
                context.advance(UploadState::Transferred);
                return Err(err);
            }
        };

        let payload: VideoPayload = match serde_json::from_slice(&response.body) {
            Ok(payload) => payload,
            Err(err) => {
                let err = UploadError::invalid_response(step, err);
                return Err(self.fail(context, step, err));
            }
        };
        if payload.shortcode != context.shortcode() {
            let reason = format!(
                "expected shortcode {}, got {}",
                context.shortcode(),
                payload.shortcode
            );
            return Err(self.fail(context, step, UploadError::invalid_response(step, reason)));
        }

        let record = VideoRecord::from_payload(payload, &self.config.api.public_base_url);
        context.advance(UploadState::Completed);
        self.release(context.shortcode());
        info!(shortcode = %record.shortcode, url = %record.url, "upload finalized");
        Ok(record)
    }

    /// Discards the remote record. Only valid before transfer has started.
    pub async fn cancel(
        &self,
        session: &dyn Session,
        context: &mut UploadContext,
    ) -> UploadResult<()> {
        require_state(
            context,
            UploadStep::Cancel,
            &[UploadState::Negotiated, UploadState::Initialized],
        )?;
        self.cancel_shortcode(session, context.shortcode()).await?;
        context.advance(UploadState::Cancelled);
        self.release(context.shortcode());
        Ok(())
    }

    /// Cancels by shortcode alone, e.g. one printed by an earlier failed run. A record the
    /// remote side has already discarded is not an error.
    pub async fn cancel_shortcode(
        &self,
        session: &dyn Session,
        shortcode: &str,
    ) -> UploadResult<()> {
        let step = UploadStep::Cancel;
        let request = SessionRequest::post(self.endpoints.cancel(shortcode));
        let response = session
            .send(request)
            .await
            .map_err(|err| UploadError::transport(step, err))?;
        if GONE_STATUSES.contains(&response.status) {
            warn!(shortcode, status = response.status, "shortcode already discarded remotely");
            return Ok(());
        }
        ensure_success(step, &response)?;
        info!(shortcode, "upload cancelled");
        Ok(())
    }

    /// Gives up on a context locally without any remote call, releasing its shortcode.
    pub fn abandon(&self, context: &mut UploadContext) {
        if context.advance(UploadState::Failed) {
            self.release(context.shortcode());
            info!(shortcode = context.shortcode(), "upload abandoned");
        }
    }

    /// Validate, negotiate, initialize, transfer and finalize in order.
    ///
    /// Failures before the transfer leave nothing behind remotely: a negotiated shortcode is
    /// cancelled when initialization fails. Failures at or after the transfer carry the
    /// context so the caller can resume or cancel.
    pub async fn upload_video(
        &self,
        session: &dyn Session,
        path: &Path,
        title: Option<&str>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<VideoRecord, PipelineError> {
        let report = self.validator.check(path).await.map_err(UploadError::from)?;
        debug!(
            file = %path.display(),
            size_bytes = report.size_bytes,
            duration_ms = report.duration_ms,
            "file passed constraints"
        );

        let mut context = self.negotiate(session, path).await?;
        if let Err(err) = self.initialize(session, &mut context, title).await {
            self.discard(session, &mut context).await;
            return Err(err.into());
        }

        if let Err(err) = self.transfer(session, &mut context, path, observer).await {
            return Err(PipelineError::new(err, Some(context)));
        }
        match self.finalize(session, &mut context).await {
            Ok(record) => Ok(record),
            Err(err) => Err(PipelineError::new(err, Some(context))),
        }
    }

    async fn discard(&self, session: &dyn Session, context: &mut UploadContext) {
        if let Err(err) = self.cancel(session, context).await {
            warn!(
                shortcode = context.shortcode(),
                error = %err,
                "failed to cancel shortcode after initialize failure"
            );
            self.abandon(context);
        }
    }

    fn fail(&self, context: &mut UploadContext, step: UploadStep, err: UploadError) -> UploadError {
        context.advance(UploadState::Failed);
        self.release(context.shortcode());
        warn!(shortcode = context.shortcode(), %step, error = %err, "upload failed");
        err
    }

    fn release(&self, shortcode: &str) {
        self.registry().remove(shortcode);
    }

    fn registry(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn send(
    session: &dyn Session,
    step: UploadStep,
    request: SessionRequest,
) -> UploadResult<SessionResponse> {
    let response = session
        .send(request)
        .await
        .map_err(|err| UploadError::transport(step, err))?;
    ensure_success(step, &response)?;
    Ok(response)
}

fn ensure_success(step: UploadStep, response: &SessionResponse) -> UploadResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(UploadError::RemoteRejected {
            step,
            status: response.status,
            body: response.text(),
        })
    }
}

fn require_state(
    context: &UploadContext,
    operation: UploadStep,
    allowed: &[UploadState],
) -> UploadResult<()> {
    if allowed.contains(&context.state()) {
        Ok(())
    } else {
        Err(UploadError::InvalidState {
            operation,
            shortcode: context.shortcode().to_string(),
            state: context.state(),
        })
    }
}
