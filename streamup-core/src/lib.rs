pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod signing;
pub mod transfer;
pub mod upload;
pub mod validate;

pub use config::{
    load_streamup_config, ApiSection, HttpSection, LimitsSection, ProbeSection, StorageSection,
    StreamupConfig, TransferSection,
};
pub use error::{ConfigError, Result};
pub use models::{
    InitializeRequest, NegotiationPayload, PlanLimits, ProcessingOptions, SecretString,
    TranscoderOptions, UploadContext, UploadCredentials, UploadFields, UploadMetadata,
    UploadState, UploadTarget, VideoPayload, VideoRecord,
};
pub use session::{
    ChunkStream, HttpSession, RequestBody, Session, SessionRequest, SessionResponse,
    TransportError,
};
pub use signing::{
    build_upload_headers, sign, AmzDate, PayloadHash, SignedRequest, SigningError,
    SigningParameters, SigningResult, TimestampPolicy, UploadHeaders,
};
pub use transfer::{FileChunks, ProgressObserver, StreamingTransfer, TransferError, TransferResult};
pub use upload::{
    ApiEndpoints, PipelineError, UploadError, UploadOrchestrator, UploadResult, UploadStep,
};
pub use validate::{
    ConstraintValidator, DurationProbe, FfprobeDurationProbe, MediaReport, ValidationError,
    ValidationResult,
};
