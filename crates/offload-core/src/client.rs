//! The remote task lifecycle client.
//!
//! One client drives at most one watched task at a time: `submit` captures an
//! identity, `watch` starts a poll loop for it (cancelling any previous one),
//! and every observation is published on the client's update stream and folded
//! into its snapshot. Dropping the client stops polling.

use crate::error::{LifecycleError, SubmissionError};
use crate::history::HistoryStore;
use crate::poll::{PollContext, PollLoop, SharedWatch, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
use crate::protocol;
use crate::task::{LoopPhase, TaskIdentity, TaskRequest, TaskSnapshot, TaskStatus, TaskUpdate};
use crate::template::TaskTemplate;
use crate::transport::QueueTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of observations for every task the client watches.
pub type TaskUpdates = UnboundedReceiverStream<TaskUpdate>;

pub struct TaskLifecycleClient {
    transport: Arc<dyn QueueTransport>,
    api_key: String,
    poll_interval: Duration,
    history: HistoryStore,
    watch: SharedWatch,
    active: Option<PollLoop>,
    updates: mpsc::UnboundedSender<TaskUpdate>,
}

impl TaskLifecycleClient {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        api_key: impl Into<String>,
        history: HistoryStore,
    ) -> (Self, TaskUpdates) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            transport,
            api_key: api_key.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            history,
            watch: SharedWatch::default(),
            active: None,
            updates: tx,
        };
        (client, UnboundedReceiverStream::new(rx))
    }

    /// Override the 2000 ms cadence. Applies to loops started afterwards.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.watch.lock().snapshot.clone()
    }

    pub fn phase(&self) -> LoopPhase {
        self.watch.lock().snapshot.phase
    }

    /// The identity being polled, cleared once it reaches a terminal status.
    pub fn current_task(&self) -> Option<TaskIdentity> {
        self.watch.lock().snapshot.task.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.phase() == LoopPhase::Polling
    }

    /// Submit a background task and return its identity. Does not start polling.
    pub async fn submit(
        &mut self,
        template: &dyn TaskTemplate,
        input: &str,
    ) -> Result<TaskIdentity, SubmissionError> {
        if let Err(e) = self.history.record_command(input).await {
            tracing::warn!("Failed to persist command history: {}", e);
        }

        let request = self.request_for(template, input, false);
        tracing::debug!("Submitting {} task", request.capability);
        let body = self.transport.submit(&request).await?;
        let task = protocol::identity_from_submit_reply(&body)?;

        if let Err(e) = self.history.record_issued(&task).await {
            tracing::warn!("Failed to persist issued task log: {}", e);
        }
        tracing::info!("Submitted task {}", task);
        Ok(task)
    }

    /// Submit a background task and start watching it.
    pub async fn submit_and_watch(
        &mut self,
        template: &dyn TaskTemplate,
        input: &str,
    ) -> Result<TaskIdentity, SubmissionError> {
        let task = self.submit(template, input).await?;
        self.watch(task.clone());
        Ok(task)
    }

    /// Submit an urgent task and wait for the server to resolve it.
    ///
    /// No identity is issued and no poll loop runs; the reply itself is terminal.
    pub async fn submit_blocking(
        &mut self,
        template: &dyn TaskTemplate,
        input: &str,
    ) -> Result<TaskStatus, SubmissionError> {
        if let Err(e) = self.history.record_command(input).await {
            tracing::warn!("Failed to persist command history: {}", e);
        }

        let request = self.request_for(template, input, true);
        tracing::debug!("Submitting blocking {} task", request.capability);
        let body = self.transport.submit_blocking(&request).await?;
        let status = protocol::status_from_blocking_reply(&body)?;
        tracing::info!(
            "Blocking {} task finished (terminal: {})",
            request.capability,
            status.is_terminal()
        );
        Ok(status)
    }

    /// Start polling `task`, replacing whatever was being watched.
    ///
    /// Returns the generation of the new loop. Must be called inside a tokio runtime.
    pub fn watch(&mut self, task: TaskIdentity) -> u64 {
        let generation = {
            let mut watch = self.watch.lock();
            watch.generation += 1;
            watch.snapshot.begin(task.clone());
            watch.generation
        };

        if let Some(previous) = self.active.take() {
            previous.cancel();
            tracing::debug!(
                "Replaced poll loop for {} (generation {})",
                previous.task(),
                previous.generation()
            );
        }

        let ctx = PollContext {
            transport: self.transport.clone(),
            api_key: self.api_key.clone(),
            interval: self.poll_interval,
            watch: self.watch.clone(),
            updates: self.updates.clone(),
        };
        self.active = Some(PollLoop::spawn(ctx, task, generation));
        generation
    }

    /// Stop watching the current task. Returns false if nothing was being polled.
    ///
    /// The remote task is left alone; the client simply stops following it.
    pub fn cancel(&mut self) -> bool {
        let was_polling = {
            let mut watch = self.watch.lock();
            watch.generation += 1;
            let was_polling = watch.snapshot.phase == LoopPhase::Polling;
            if was_polling {
                watch.snapshot.phase = LoopPhase::Idle;
                watch.snapshot.task = None;
            }
            was_polling
        };
        if let Some(active) = self.active.take() {
            active.cancel();
        }
        was_polling
    }

    /// Capabilities served by online agents, for input suggestions.
    pub async fn capabilities(&self) -> Result<Vec<String>, LifecycleError> {
        let body = self.transport.capabilities(&self.api_key).await?;
        protocol::capabilities_from_reply(&body)
    }

    fn request_for(&self, template: &dyn TaskTemplate, input: &str, urgent: bool) -> TaskRequest {
        TaskRequest {
            capability: template.capability().to_string(),
            urgent,
            payload: template.build_payload(input),
            api_key: self.api_key.clone(),
        }
    }
}

impl Drop for TaskLifecycleClient {
    fn drop(&mut self) {
        self.cancel();
    }
}
