//! HTTP access to the queue server.
//!
//! The lifecycle client only talks to the queue through [`QueueTransport`], so
//! the poll loop can be driven by a scripted transport in tests.

use crate::config::{ClientConfig, Endpoints};
use crate::error::{ConfigError, TransportError};
use crate::protocol;
use crate::task::{TaskIdentity, TaskRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const BODY_PREVIEW_LIMIT: usize = 512;

/// Request/response access to the queue. Every call returns the decoded JSON body
/// of a 2xx reply; interpretation is left to [`crate::protocol`].
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Fire-and-forget submission.
    async fn submit(&self, request: &TaskRequest) -> Result<Value, TransportError>;

    /// Submission that only returns once the server has resolved the task.
    async fn submit_blocking(&self, request: &TaskRequest) -> Result<Value, TransportError>;

    /// One status query for a submitted task.
    async fn poll(&self, task: &TaskIdentity, api_key: &str) -> Result<Value, TransportError>;

    /// Capabilities currently served by online agents.
    async fn capabilities(&self, api_key: &str) -> Result<Value, TransportError>;
}

/// [`QueueTransport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints,
        }
    }

    /// Build a transport from configuration, applying the request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            endpoints: config.endpoints.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn poll_url(&self, task: &TaskIdentity) -> String {
        format!(
            "{}/{}/{}",
            self.url(&self.endpoints.poll).trim_end_matches('/'),
            urlencoding::encode(&task.capability),
            urlencoding::encode(&task.id)
        )
    }

    async fn post_json(&self, url: String, body: &impl serde::Serialize) -> Result<Value, TransportError> {
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        if !status.is_success() {
            let server_message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| protocol::error_message(&body));
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                body: preview_body(&text),
                server_message,
            });
        }

        serde_json::from_str(&text).map_err(|source| TransportError::Decode { url, source })
    }
}

#[async_trait]
impl QueueTransport for HttpTransport {
    async fn submit(&self, request: &TaskRequest) -> Result<Value, TransportError> {
        self.post_json(self.url(&self.endpoints.submit), request).await
    }

    async fn submit_blocking(&self, request: &TaskRequest) -> Result<Value, TransportError> {
        self.post_json(self.url(&self.endpoints.submit_blocking), request)
            .await
    }

    async fn poll(&self, task: &TaskIdentity, api_key: &str) -> Result<Value, TransportError> {
        self.post_json(self.poll_url(task), &json!({ "apiKey": api_key }))
            .await
    }

    async fn capabilities(&self, api_key: &str) -> Result<Value, TransportError> {
        self.post_json(
            self.url(&self.endpoints.capabilities),
            &json!({ "apiKey": api_key }),
        )
        .await
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}
