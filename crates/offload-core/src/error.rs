//! Error types shared by the transport, the submission path and the poll loop.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to get a usable HTTP reply from the queue.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
        /// `error.message` from the body, when the server sent one.
        server_message: Option<String>,
    },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything that can end a submission or a poll loop.
///
/// All variants are shown to the operator as a message; none are retried.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("server error: {0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Submissions fail with the same taxonomy as polls.
pub type SubmissionError = LifecycleError;

impl From<TransportError> for LifecycleError {
    fn from(err: TransportError) -> Self {
        // A non-2xx reply that explains itself is the server talking, not the network.
        match err {
            TransportError::Status {
                server_message: Some(message),
                ..
            } => LifecycleError::Server(message),
            other => LifecycleError::Transport(other),
        }
    }
}

/// Errors from the durable key-value state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid state key: {0}")]
    InvalidKey(String),
}

/// Errors while loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No server URL configured (set server_url, OFFLOAD_SERVER_URL or --server)")]
    MissingServerUrl,

    #[error("Invalid server URL '{0}'")]
    InvalidServerUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
