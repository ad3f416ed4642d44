#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;

use streamup_core::config::StreamupConfig;
use streamup_core::session::{RequestBody, Session, SessionRequest, SessionResponse, TransportError};
use streamup_core::transfer::ProgressObserver;
use streamup_core::upload::UploadOrchestrator;
use streamup_core::validate::{DurationProbe, ValidationResult};

pub const NEGOTIATION_JSON: &str = include_str!("../fixtures/negotiation.json");
pub const SHORTCODE: &str = "y3vwnh";
pub const ONE_MIB: usize = 1024 * 1024;

pub fn negotiation_json() -> Value {
    serde_json::from_str(NEGOTIATION_JSON).unwrap()
}

pub fn video_json(shortcode: &str) -> String {
    serde_json::json!({
        "shortcode": shortcode,
        "date_added": 1_759_158_640,
        "url": format!("https://cdn.example/{shortcode}.mp4"),
        "plan_limits": {
            "is_exceeding_free_plan_limits": false,
            "is_exceeding_free_plan_duration_limit": false,
            "is_exceeding_free_plan_size_limit": false,
            "should_restrict_playback": false,
            "has_owner_without_plan": true
        }
    })
    .to_string()
}

/// Writes a file of `len` patterned bytes and returns its path.
pub fn media_file(dir: &TempDir, name: &str, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn orchestrator(config: StreamupConfig, duration_ms: u64) -> UploadOrchestrator {
    UploadOrchestrator::new(config)
        .unwrap()
        .with_probe(Arc::new(StaticProbe(duration_ms)))
}

/// Reports a fixed duration for every file.
pub struct StaticProbe(pub u64);

#[async_trait]
impl DurationProbe for StaticProbe {
    async fn duration_ms(&self, _path: &Path) -> ValidationResult<u64> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct ProgressLog {
    pub progress: Mutex<Vec<f64>>,
    pub completions: Mutex<u32>,
}

impl ProgressLog {
    pub fn progress(&self) -> Vec<f64> {
        self.progress.lock().unwrap().clone()
    }

    pub fn completions(&self) -> u32 {
        *self.completions.lock().unwrap()
    }
}

impl ProgressObserver for ProgressLog {
    fn on_progress(&self, percent: f64) {
        self.progress.lock().unwrap().push(percent);
    }

    fn on_complete(&self) {
        *self.completions.lock().unwrap() += 1;
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

enum Scripted {
    Respond(u16, String),
    Fail(TransportError),
}

/// Session that answers from a queue and records every request. Streamed bodies are
/// drained before the scripted response is returned.
#[derive(Default)]
pub struct ScriptedSession {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
    truncate_after_first_chunk: Mutex<Option<(PathBuf, u64)>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, body: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Respond(status, body.into()));
        self
    }

    pub fn fail(self, error: TransportError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
        self
    }

    /// Shrinks `path` to `len` bytes once the next streamed body has yielded its first chunk.
    pub fn truncate_after_first_chunk(self, path: &Path, len: u64) -> Self {
        *self.truncate_after_first_chunk.lock().unwrap() = Some((path.to_path_buf(), len));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path_fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(path_fragment))
            .count()
    }

    pub fn calls_with_method(&self, method: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn send(&self, request: SessionRequest) -> Result<SessionResponse, TransportError> {
        let next = self.script.lock().unwrap().pop_front();
        let mut recorded = RecordedRequest {
            method: request.method.to_string(),
            url: request.url,
            headers: request.headers,
            body: Vec::new(),
        };

        let outcome = match next {
            None => Err(TransportError::Other("no scripted response".into())),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Respond(status, body)) => {
                let drained = match request.body {
                    RequestBody::Empty => Ok(()),
                    RequestBody::Json(bytes) => {
                        recorded.body = bytes;
                        Ok(())
                    }
                    RequestBody::Stream { mut chunks, .. } => {
                        let mut result = Ok(());
                        while let Some(chunk) = chunks.next().await {
                            match chunk {
                                Ok(bytes) => {
                                    recorded.body.extend_from_slice(&bytes);
                                    let truncate =
                                        self.truncate_after_first_chunk.lock().unwrap().take();
                                    if let Some((path, len)) = truncate {
                                        std::fs::OpenOptions::new()
                                            .write(true)
                                            .open(&path)
                                            .unwrap()
                                            .set_len(len)
                                            .unwrap();
                                    }
                                }
                                Err(err) => {
                                    result = Err(TransportError::from(err));
                                    break;
                                }
                            }
                        }
                        result
                    }
                };
                drained.map(|()| SessionResponse::new(status, body))
            }
        };

        self.requests.lock().unwrap().push(recorded);
        outcome
    }
}
