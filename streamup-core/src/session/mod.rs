//! Transport seam. The orchestrator only ever talks to a [`Session`]; production code uses
//! [`HttpSession`], tests script their own.

mod http;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;

use crate::transfer::TransferError;

pub use http::HttpSession;

/// Streamed request body. `Sync` is required by `reqwest::Body::wrap_stream`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send + Sync>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request body could not be read: {0}")]
    Body(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(error.to_string())
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else if error.is_body() {
            TransportError::Body(error.to_string())
        } else {
            TransportError::Other(error.to_string())
        }
    }
}

impl From<TransferError> for TransportError {
    fn from(error: TransferError) -> Self {
        TransportError::Body(error.to_string())
    }
}

pub enum RequestBody {
    Empty,
    Json(Vec<u8>),
    Stream { length: u64, chunks: ChunkStream },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Json(bytes) => write!(f, "Json({} bytes)", bytes.len()),
            RequestBody::Stream { length, .. } => write!(f, "Stream({length} bytes)"),
        }
    }
}

#[derive(Debug)]
pub struct SessionRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl SessionRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> serde_json::Result<Self> {
        self.body = RequestBody::Json(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn stream(mut self, length: u64, chunks: ChunkStream) -> Self {
        self.body = RequestBody::Stream { length, chunks };
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SessionResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An authenticated handle to the remote service. Implementations keep identity
/// (cookies) across calls; the orchestrator never stores one.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send(&self, request: SessionRequest) -> Result<SessionResponse, TransportError>;
}
