//! Abstract interfaces for the engine's external collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Frame, WaitStatus, WaitTarget};

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Wait job not found: {0}")]
    NotFound(String),

    #[error("Wait job already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Wake error: {0}")]
    Wake(String),

    #[error("Task sink error: {0}")]
    TaskSink(String),

    #[error("Engine shut down")]
    ShutDown,
}

/// Vision model seam: frame plus condition in, raw reply text out.
///
/// Implementations must be safe to call concurrently; the engine evaluates
/// jobs on different displays in parallel.
#[async_trait]
pub trait VisionAdapter: Send + Sync {
    async fn evaluate(&self, frame: &Frame, condition: &str) -> Result<String, EngineError>;
}

/// Pixel source seam. The engine guarantees two captures on the same
/// display are never in flight at once; implementations need no locking of
/// their own.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self, display: &str, target: &WaitTarget) -> Result<Frame, EngineError>;
}

/// Delivers one terminal wake message to the hosting agent.
#[async_trait]
pub trait WakeNotifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), EngineError>;
}

/// Metadata rewrite applied to a task when one of its waits finishes.
#[derive(Debug, Clone)]
pub struct TaskWaitUpdate {
    /// Wait id to drop from the task's `active_wait_ids`.
    pub remove_id: String,
    pub last_state: WaitStatus,
    /// Epoch seconds of the terminal event.
    pub last_event_at: i64,
}

/// External task-memory seam: thread messages and wait-state metadata.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Append a `wait`-typed message to the task's thread.
    async fn post_wait_message(
        &self,
        task_id: &str,
        state: WaitStatus,
        content: &str,
    ) -> Result<(), EngineError>;

    /// Rewrite the task's wait-state metadata after a terminal transition.
    async fn update_wait_state(
        &self,
        task_id: &str,
        update: &TaskWaitUpdate,
    ) -> Result<(), EngineError>;

    /// Record a newly registered wait against the task.
    async fn link_wait(&self, task_id: &str, wait_id: &str) -> Result<(), EngineError>;
}

/// Durable record of a job, for crash-recovery listing only. The in-memory
/// active set stays authoritative while the engine runs.
#[derive(Debug, Clone)]
pub struct WaitRecord {
    pub id: String,
    pub task_id: Option<String>,
    pub target: WaitTarget,
    pub criteria: String,
    pub timeout_s: u64,
    pub poll_interval_s: f64,
    pub status: WaitStatus,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Persistence seam.
#[async_trait]
pub trait WaitStore: Send + Sync {
    /// Record a job at registration, status `watching`.
    async fn record_created(&self, record: &WaitRecord) -> Result<(), EngineError>;

    /// Commit a job's terminal status. Called exactly once per job.
    async fn record_terminal(
        &self,
        id: &str,
        status: WaitStatus,
        detail: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<Option<WaitRecord>, EngineError>;

    /// Mark every still-`watching` record as terminal `error`. Run once at
    /// startup; returns the ids that were orphaned by the previous run.
    async fn recover_interrupted(&self) -> Result<Vec<String>, EngineError>;
}
