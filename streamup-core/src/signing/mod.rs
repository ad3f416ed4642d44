//! AWS Signature Version 4 for the direct-to-storage PUT.
//!
//! Every function here is pure: the timestamp is an input, so identical parameters always
//! produce the identical `Authorization` value. Only [`AmzDate::now`] reads the clock.

mod headers;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::UploadCredentials;

pub use headers::{build_upload_headers, TimestampPolicy, UploadHeaders};

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "s3";
pub const TERMINATOR: &str = "aws4_request";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const KEY_PREFIX: &str = "AWS4";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// RFC 3986 unreserved characters stay literal, everything else is `%XX`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
const PATH_ENCODE_SET: &AsciiSet = &QUERY_ENCODE_SET.remove(b'/');

/// Headers the signer owns; callers cannot override them through `extra_headers`.
const RESERVED_HEADERS: [&str; 4] = [
    "host",
    "x-amz-content-sha256",
    "x-amz-date",
    "x-amz-security-token",
];

type HmacSha256 = Hmac<Sha256>;

pub type SigningResult<T> = Result<T, SigningError>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing input invalid: {0}")]
    InputInvalid(String),
}

impl SigningError {
    fn invalid(message: impl Into<String>) -> Self {
        SigningError::InputInvalid(message.into())
    }
}

/// Request time at second resolution, rendered as `YYYYMMDDTHHMMSSZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AmzDate(DateTime<Utc>);

impl AmzDate {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn parse(value: &str) -> SigningResult<Self> {
        if value.len() != 16 {
            return Err(SigningError::invalid(format!(
                "timestamp {value:?} is not in YYYYMMDDTHHMMSSZ form"
            )));
        }
        NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
            .map(|naive| Self(naive.and_utc()))
            .map_err(|err| SigningError::invalid(format!("timestamp {value:?}: {err}")))
    }

    pub fn date_stamp(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for AmzDate {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl fmt::Display for AmzDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(AMZ_DATE_FORMAT))
    }
}

/// Value of `x-amz-content-sha256` and the last line of the canonical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadHash {
    /// The body is deliberately not hashed.
    Unsigned,
    /// Lower-case hex SHA-256 of the body.
    Sha256(String),
}

impl PayloadHash {
    pub fn of(body: &[u8]) -> Self {
        PayloadHash::Sha256(hex::encode(Sha256::digest(body)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PayloadHash::Unsigned => UNSIGNED_PAYLOAD,
            PayloadHash::Sha256(hash) => hash,
        }
    }

    fn validate(&self) -> SigningResult<()> {
        match self {
            PayloadHash::Unsigned => Ok(()),
            PayloadHash::Sha256(hash)
                if hash.len() == 64
                    && hash
                        .bytes()
                        .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte)) =>
            {
                Ok(())
            }
            PayloadHash::Sha256(hash) => Err(SigningError::invalid(format!(
                "payload hash {hash:?} is not a lower-case sha256 hex digest"
            ))),
        }
    }
}

/// Everything that describes one request to sign, minus the key material.
#[derive(Debug, Clone)]
pub struct SigningParameters {
    pub method: String,
    pub host: String,
    pub path: String,
    pub region: String,
    pub timestamp: AmzDate,
    pub payload_hash: PayloadHash,
    pub extra_headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl SigningParameters {
    pub fn new(
        method: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        region: impl Into<String>,
        timestamp: AmzDate,
    ) -> Self {
        Self {
            method: method.into(),
            host: host.into(),
            path: path.into(),
            region: region.into(),
            timestamp,
            payload_hash: PayloadHash::Unsigned,
            extra_headers: BTreeMap::new(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_payload_hash(mut self, payload_hash: PayloadHash) -> Self {
        self.payload_hash = payload_hash;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    fn validate(&self) -> SigningResult<()> {
        if self.method.is_empty() || !self.method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(SigningError::invalid(format!(
                "method {:?} must be a non-empty upper-case token",
                self.method
            )));
        }
        require("host", &self.host)?;
        require("region", &self.region)?;
        if !self.path.is_empty() && !self.path.starts_with('/') {
            return Err(SigningError::invalid(format!(
                "path {:?} must start with '/'",
                self.path
            )));
        }
        for name in self.extra_headers.keys() {
            if name.is_empty() || name.bytes().any(|b| !b.is_ascii_graphic() || b == b':') {
                return Err(SigningError::invalid(format!("header name {name:?} is invalid")));
            }
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(SigningError::invalid(format!(
                    "header {name:?} is set by the signer"
                )));
            }
        }
        self.payload_hash.validate()
    }
}

/// Output of [`sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub authorization: String,
    pub signed_headers: String,
    pub credential_scope: String,
}

impl SignedRequest {
    pub fn into_parts(self) -> (String, String, String) {
        (self.authorization, self.signed_headers, self.credential_scope)
    }
}

/// Signs `params` with `credentials`.
///
/// The canonical header block always contains `host`, `x-amz-content-sha256` and
/// `x-amz-date`, plus `x-amz-security-token` when the credentials carry a session token,
/// plus every entry of `extra_headers`.
pub fn sign(
    params: &SigningParameters,
    credentials: &UploadCredentials,
) -> SigningResult<SignedRequest> {
    params.validate()?;
    require("access key id", &credentials.access_key_id)?;
    require("secret access key", credentials.secret_access_key.expose())?;

    let date_stamp = params.timestamp.date_stamp();
    let credential_scope = credential_scope(&date_stamp, &params.region);
    let timestamp = params.timestamp.to_string();

    let mut headers = BTreeMap::new();
    headers.insert("host".to_string(), params.host.clone());
    headers.insert(
        "x-amz-content-sha256".to_string(),
        params.payload_hash.as_str().to_string(),
    );
    headers.insert("x-amz-date".to_string(), timestamp.clone());
    if let Some(token) = credentials
        .session_token
        .as_ref()
        .filter(|token| !token.is_empty())
    {
        headers.insert("x-amz-security-token".to_string(), token.expose().to_string());
    }
    for (name, value) in &params.extra_headers {
        headers.insert(name.to_ascii_lowercase(), value.clone());
    }

    let (canonical, signed_headers) = canonical_request(params, &headers);
    let string_to_sign = string_to_sign(&timestamp, &credential_scope, &canonical);
    let key = signing_key(
        credentials.secret_access_key.expose(),
        &date_stamp,
        &params.region,
    )?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );
    Ok(SignedRequest {
        authorization,
        signed_headers,
        credential_scope,
    })
}

pub fn credential_scope(date_stamp: &str, region: &str) -> String {
    format!("{date_stamp}/{region}/{SERVICE}/{TERMINATOR}")
}

/// Returns the canonical request and the `;`-joined signed header names.
pub fn canonical_request(
    params: &SigningParameters,
    headers: &BTreeMap<String, String>,
) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", normalize_header_value(value)))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let path = canonical_path(&params.path);
    let query = canonical_query(&params.query);
    let canonical = [
        params.method.as_str(),
        path.as_str(),
        query.as_str(),
        canonical_headers.as_str(),
        signed_headers.as_str(),
        params.payload_hash.as_str(),
    ]
    .join("\n");
    (canonical, signed_headers)
}

pub fn string_to_sign(timestamp: &str, credential_scope: &str, canonical_request: &str) -> String {
    let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    [ALGORITHM, timestamp, credential_scope, hashed.as_str()].join("\n")
}

/// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), "s3"), "aws4_request")`
pub fn signing_key(secret_key: &str, date_stamp: &str, region: &str) -> SigningResult<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("{KEY_PREFIX}{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

pub fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

pub fn canonical_query(query: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(name, value)| (uri_encode(name), uri_encode(value)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> SigningResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| SigningError::invalid(format!("hmac key rejected: {err}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn require(field: &str, value: &str) -> SigningResult<()> {
    if value.trim().is_empty() {
        Err(SigningError::invalid(format!("{field} is empty")))
    } else {
        Ok(())
    }
}
