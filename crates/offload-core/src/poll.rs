//! The poll loop: follows one task identity until it reaches a terminal status.
//!
//! Each watched identity gets its own spawned loop and cancellation token. The
//! loop polls immediately, then once per interval tick; a cycle never starts
//! before the previous reply has been handled. Every reply is applied only if
//! the loop's generation is still the current one, so a superseded loop drops
//! whatever was in flight when it was replaced.

use crate::error::LifecycleError;
use crate::protocol;
use crate::task::{TaskIdentity, TaskSnapshot, TaskStatus, TaskUpdate};
use crate::transport::QueueTransport;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// `tokio::time::interval` rejects a zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State shared between a client and its poll loops.
#[derive(Debug, Default)]
pub(crate) struct WatchState {
    /// Incremented every time the watched identity is replaced or dropped.
    pub generation: u64,
    pub snapshot: TaskSnapshot,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedWatch(Arc<Mutex<WatchState>>);

impl SharedWatch {
    pub fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a loop needs besides the identity it follows.
#[derive(Clone)]
pub(crate) struct PollContext {
    pub transport: Arc<dyn QueueTransport>,
    pub api_key: String,
    pub interval: Duration,
    pub watch: SharedWatch,
    pub updates: mpsc::UnboundedSender<TaskUpdate>,
}

/// Handle to a running loop. Dropping it cancels the loop.
#[derive(Debug)]
pub(crate) struct PollLoop {
    task: TaskIdentity,
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollLoop {
    /// Spawn a loop for `task` under `generation`. Must be called inside a tokio runtime.
    pub fn spawn(mut ctx: PollContext, task: TaskIdentity, generation: u64) -> Self {
        ctx.interval = ctx.interval.max(MIN_POLL_INTERVAL);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            ctx,
            task.clone(),
            generation,
            token.child_token(),
        ));
        Self {
            task,
            generation,
            token,
            handle,
        }
    }

    pub fn task(&self) -> &TaskIdentity {
        &self.task
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop issuing polls. A reply already in flight is discarded when it arrives.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the spawned loop has returned.
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_poll_loop(
    ctx: PollContext,
    task: TaskIdentity,
    generation: u64,
    token: CancellationToken,
) {
    let mut ticker = interval(ctx.interval);
    // A slow reply stretches the interval instead of causing a burst of catch-up ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles: u64 = 0;

    tracing::debug!("Polling {} (generation {})", task, generation);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Poll loop for {} cancelled after {} cycles", task, cycles);
                return;
            }
            _ = ticker.tick() => {}
        }

        if token.is_cancelled() {
            return;
        }
        cycles += 1;
        let status = poll_once(&ctx, &task).await;

        if token.is_cancelled() || !publish(&ctx, &task, generation, &status) {
            tracing::warn!(
                "Discarding reply for {} from superseded poll loop (generation {})",
                task,
                generation
            );
            return;
        }

        if status.is_terminal() {
            match &status {
                TaskStatus::Failed { error } => {
                    tracing::info!("Task {} failed after {} polls: {}", task, cycles, error)
                }
                _ => tracing::info!("Task {} completed after {} polls", task, cycles),
            }
            return;
        }
    }
}

/// One request-response cycle. Any failure is terminal.
async fn poll_once(ctx: &PollContext, task: &TaskIdentity) -> TaskStatus {
    let reply = ctx
        .transport
        .poll(task, &ctx.api_key)
        .await
        .map_err(LifecycleError::from)
        .and_then(|body| protocol::status_from_poll_reply(&body));

    match reply {
        Ok(status) => {
            tracing::debug!("Poll {}: {:?}", task, status);
            status
        }
        Err(err) => TaskStatus::Failed {
            error: err.to_string(),
        },
    }
}

/// Apply `status` if `generation` is still current. Returns false for stale replies.
fn publish(ctx: &PollContext, task: &TaskIdentity, generation: u64, status: &TaskStatus) -> bool {
    let mut watch = ctx.watch.lock();
    if watch.generation != generation {
        return false;
    }
    watch.snapshot.apply(status);
    // Sent under the lock so a replacement can never be overtaken by a stale update.
    let _ = ctx.updates.send(TaskUpdate {
        generation,
        task: task.clone(),
        status: status.clone(),
        observed_at: Utc::now(),
    });
    true
}
