use tracing::debug;

use super::{
    canonical_path, sign, AmzDate, PayloadHash, SigningError, SigningParameters, SigningResult,
};
use crate::config::StorageSection;
use crate::models::UploadContext;

/// Which clock reading goes into `x-amz-date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Read the clock at build time. Production transfers use this.
    Now,
    Fixed(AmzDate),
    /// Reuse the `X-Amz-Date` issued during negotiation.
    FromFields,
}

/// Signed header set for the storage PUT.
#[derive(Debug, Clone)]
pub struct UploadHeaders {
    pub url: String,
    pub timestamp: AmzDate,
    pub headers: Vec<(String, String)>,
}

impl UploadHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub fn build_upload_headers(
    context: &UploadContext,
    storage: &StorageSection,
    content_length: u64,
    policy: TimestampPolicy,
) -> SigningResult<UploadHeaders> {
    let target = context.target();
    let credentials = context.credentials();
    let session_token = credentials
        .session_token
        .as_ref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| SigningError::InputInvalid("session token is missing".into()))?;
    let region = target.fields.region().ok_or_else(|| {
        SigningError::InputInvalid(format!(
            "credential {:?} carries no region",
            target.fields.credential
        ))
    })?;
    let timestamp = match policy {
        TimestampPolicy::Now => AmzDate::now(),
        TimestampPolicy::Fixed(timestamp) => timestamp,
        TimestampPolicy::FromFields => AmzDate::parse(&target.fields.date)?,
    };
    let path = target.object_path();

    let params =
        SigningParameters::new("PUT", target.host.as_str(), path.as_str(), region, timestamp)
            .with_payload_hash(PayloadHash::Unsigned)
            .with_header("x-amz-acl", target.fields.acl.as_str())
            .with_header("x-amz-user-agent", storage.sdk_user_agent.as_str());
    let signed = sign(&params, credentials)?;
    debug!(
        shortcode = context.shortcode(),
        signed_headers = %signed.signed_headers,
        timestamp = %timestamp,
        "signed storage upload"
    );

    let headers = vec![
        ("Host".to_string(), target.host.clone()),
        ("Authorization".to_string(), signed.authorization),
        ("Content-Type".to_string(), storage.content_type.clone()),
        ("Content-Length".to_string(), content_length.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            PayloadHash::Unsigned.as_str().to_string(),
        ),
        ("x-amz-date".to_string(), timestamp.to_string()),
        (
            "x-amz-security-token".to_string(),
            session_token.expose().to_string(),
        ),
        ("x-amz-acl".to_string(), target.fields.acl.clone()),
        ("x-amz-user-agent".to_string(), storage.sdk_user_agent.clone()),
    ];

    Ok(UploadHeaders {
        url: format!("{}{}", target.endpoint, canonical_path(&path)),
        timestamp,
        headers,
    })
}
