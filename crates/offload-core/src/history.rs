//! Submission history and the issued task log.
//!
//! Both are small bounded lists persisted as JSON arrays in a string-keyed
//! store. They are written by the submission path only.

use crate::error::PersistenceError;
use crate::task::TaskIdentity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const COMMAND_HISTORY_LIMIT: usize = 20;
pub const ISSUED_TASK_LIMIT: usize = 100;

pub const COMMAND_HISTORY_KEY: &str = "command_history";
pub const ISSUED_TASKS_KEY: &str = "issued_tasks";

/// Distinct submitted commands, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionHistory {
    entries: Vec<String>,
}

impl SubmissionHistory {
    /// Build from stored entries, dropping duplicates and clamping to the limit.
    pub fn from_entries(entries: Vec<String>) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !deduped.contains(&entry) {
                deduped.push(entry);
            }
        }
        deduped.truncate(COMMAND_HISTORY_LIMIT);
        Self { entries: deduped }
    }

    /// Move `command` to the front, inserting it if new.
    pub fn push(&mut self, command: &str) {
        self.entries.retain(|existing| existing != command);
        self.entries.insert(0, command.to_string());
        self.entries.truncate(COMMAND_HISTORY_LIMIT);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Entries starting with `prefix`, for input suggestions.
    pub fn suggestions<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .map(String::as_str)
            .filter(move |entry| entry.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `capability/id` of issued tasks, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuedTaskLog {
    entries: Vec<String>,
}

impl IssuedTaskLog {
    pub fn from_entries(mut entries: Vec<String>) -> Self {
        entries.truncate(ISSUED_TASK_LIMIT);
        Self { entries }
    }

    pub fn push(&mut self, task: &TaskIdentity) {
        self.entries.insert(0, task.to_string());
        self.entries.truncate(ISSUED_TASK_LIMIT);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable string-keyed storage.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    async fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.directory.join(format!("{key}.json")))
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(content))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        // Readers must never see a half-written file.
        let tmp = self.directory.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("Saved {} to {}", key, path.display());
        Ok(())
    }
}

/// Non-durable backend for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Both lists plus the backend they are persisted to.
pub struct HistoryStore {
    backend: Box<dyn StateBackend>,
    commands: SubmissionHistory,
    issued: IssuedTaskLog,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("commands", &self.commands)
            .field("issued", &self.issued)
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Load both lists. Missing, empty or corrupt entries load as empty lists.
    pub async fn load(backend: Box<dyn StateBackend>) -> Result<Self, PersistenceError> {
        let commands = SubmissionHistory::from_entries(
            read_list(backend.as_ref(), COMMAND_HISTORY_KEY).await?,
        );
        let issued = IssuedTaskLog::from_entries(read_list(backend.as_ref(), ISSUED_TASKS_KEY).await?);
        Ok(Self {
            backend,
            commands,
            issued,
        })
    }

    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            commands: SubmissionHistory::default(),
            issued: IssuedTaskLog::default(),
        }
    }

    pub fn commands(&self) -> &SubmissionHistory {
        &self.commands
    }

    pub fn issued(&self) -> &IssuedTaskLog {
        &self.issued
    }

    /// Push a command to the front of the history and persist it.
    pub async fn record_command(&mut self, command: &str) -> Result<(), PersistenceError> {
        self.commands.push(command);
        write_list(self.backend.as_ref(), COMMAND_HISTORY_KEY, self.commands.entries()).await
    }

    /// Record a freshly issued task identity and persist the log.
    pub async fn record_issued(&mut self, task: &TaskIdentity) -> Result<(), PersistenceError> {
        self.issued.push(task);
        write_list(self.backend.as_ref(), ISSUED_TASKS_KEY, self.issued.entries()).await
    }
}

async fn read_list(backend: &dyn StateBackend, key: &str) -> Result<Vec<String>, PersistenceError> {
    let Some(content) = backend.read(key).await? else {
        return Ok(Vec::new());
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            tracing::warn!("Ignoring corrupt stored {}: {}", key, e);
            Ok(Vec::new())
        }
    }
}

async fn write_list(
    backend: &dyn StateBackend,
    key: &str,
    entries: &[String],
) -> Result<(), PersistenceError> {
    let content = serde_json::to_string(entries)?;
    backend.write(key, &content).await
}
