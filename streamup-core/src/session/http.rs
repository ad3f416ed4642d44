use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client};
use url::Url;

use super::{RequestBody, Session, SessionRequest, SessionResponse, TransportError};
use crate::config::StreamupConfig;

/// reqwest-backed session with a shared cookie jar.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    jar: Arc<Jar>,
}

impl HttpSession {
    pub fn new(config: &StreamupConfig) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(config.api.user_agent.as_str())
            .cookie_provider(jar.clone())
            .connect_timeout(Duration::from_secs(config.http.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.http.request_timeout_seconds))
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        Ok(Self { client, jar })
    }

    /// Seeds the jar with a `Set-Cookie` style value for `url`, e.g. a session cookie
    /// obtained from a previous login.
    pub fn with_cookie(self, cookie: &str, url: &Url) -> Self {
        self.jar.add_cookie_str(cookie, url);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn send(&self, request: SessionRequest) -> Result<SessionResponse, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.header(CONTENT_TYPE, "application/json").body(bytes),
            RequestBody::Stream { chunks, .. } => builder.body(Body::wrap_stream(chunks)),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?;
        Ok(SessionResponse {
            status,
            headers,
            body,
        })
    }
}
