pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod poll;
pub mod protocol;
pub mod task;
pub mod template;
pub mod transport;

pub use client::{TaskLifecycleClient, TaskUpdates};
pub use config::{ClientConfig, Endpoints};
pub use error::{ConfigError, LifecycleError, PersistenceError, SubmissionError, TransportError};
pub use history::{FileBackend, HistoryStore, IssuedTaskLog, MemoryBackend, StateBackend, SubmissionHistory};
pub use poll::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
pub use task::{LoopPhase, TaskIdentity, TaskRequest, TaskSnapshot, TaskStatus, TaskUpdate};
pub use template::{LlmTemplate, RawTemplate, ShellTemplate, TaskTemplate};
pub use transport::{HttpTransport, QueueTransport};
