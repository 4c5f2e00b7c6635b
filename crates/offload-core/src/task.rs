//! Task identities, requests and the observations made while following them.
//!
//! A task is submitted once, receives a server-assigned identity, and is then
//! observed until it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of one unit of work on the remote queue.
///
/// `capability` selects the executor class, `id` is assigned by the server and
/// opaque to the client. On the wire the capability is called `cap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    #[serde(rename = "cap")]
    pub capability: String,
    pub id: String,
}

impl TaskIdentity {
    pub fn new(capability: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            id: id.into(),
        }
    }

    /// Both halves must be non-empty for the identity to be usable as a poll key.
    pub fn is_well_formed(&self) -> bool {
        !self.capability.trim().is_empty() && !self.id.trim().is_empty()
    }
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.capability, self.id)
    }
}

/// Body of a task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// The capability required to execute this task.
    pub capability: String,
    /// Urgent tasks are resolved while the submitting request waits.
    pub urgent: bool,
    /// Capability-specific payload.
    pub payload: Value,
    pub api_key: String,
}

/// One observation of a task, as interpreted from a poll (or blocking) reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Still running; carries whatever progress the server reported.
    Pending {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log: Option<String>,
    },
    /// Finished successfully.
    Completed { output: Value },
    /// Finished with an error.
    Failed { error: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending { .. })
    }
}

/// Phase of the poll loop owned by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    Idle,
    Polling,
    Completed,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Completed | LoopPhase::Failed)
    }
}

/// An observation delivered to whoever is following the client.
#[derive(Debug, Clone, Serialize)]
pub struct TaskUpdate {
    /// Watch generation the observation belongs to.
    pub generation: u64,
    pub task: TaskIdentity,
    pub status: TaskStatus,
    pub observed_at: DateTime<Utc>,
}

/// What a panel would display for the current (or last) watched task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub phase: LoopPhase,
    /// Cleared as soon as a terminal status arrives.
    pub task: Option<TaskIdentity>,
    /// Last non-terminal status string (`status: ...` indicator).
    pub stage: Option<String>,
    /// Log buffer; replaced by every reply that carries a log.
    pub log: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TaskSnapshot {
    /// Reset for a freshly watched identity.
    pub(crate) fn begin(&mut self, task: TaskIdentity) {
        *self = TaskSnapshot {
            phase: LoopPhase::Polling,
            task: Some(task),
            ..TaskSnapshot::default()
        };
    }

    /// Fold one observation into the displayed state.
    pub(crate) fn apply(&mut self, status: &TaskStatus) {
        match status {
            TaskStatus::Pending { stage, log } => {
                if let Some(stage) = stage {
                    self.stage = Some(stage.clone());
                }
                if let Some(log) = log {
                    self.log = Some(log.clone());
                }
            }
            TaskStatus::Completed { output } => {
                self.phase = LoopPhase::Completed;
                self.task = None;
                self.output = Some(output.clone());
            }
            TaskStatus::Failed { error } => {
                self.phase = LoopPhase::Failed;
                self.task = None;
                self.error = Some(error.clone());
            }
        }
    }
}
