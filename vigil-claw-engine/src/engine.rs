//! The smart-wait scheduler.
//!
//! One engine instance owns the active job map and a single control loop.
//! Each tick transitions timeout-expired jobs first, then evaluates every
//! due job concurrently (capture serialized per display, vision calls fully
//! parallel), then sleeps until the earliest upcoming deadline or a control
//! event. Terminal transitions funnel through `finalize`, which removes the
//! job from the active map under the map lock — the first writer wins and
//! every later attempt is a no-op, so the store commit, task post, and wake
//! notification each happen at most once per job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::arbiter::CaptureArbiter;
use crate::interfaces::{
    EngineError, FrameSource, TaskSink, TaskWaitUpdate, VisionAdapter, WaitStore, WakeNotifier,
};
use crate::job::WaitJob;
use crate::types::{EngineConfig, VerdictState, WaitSnapshot, WaitStatus, WaitTarget, WaitUpdate};
use crate::verdict::parse_verdict;

/// Polling interval applied when a registration does not request one.
pub const DEFAULT_POLL_INTERVAL_S: f64 = 2.0;

/// A registration request.
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub target: WaitTarget,
    pub display: String,
    pub criteria: String,
    /// `None` falls back to the configured default timeout.
    pub timeout_s: Option<u64>,
    /// `None` falls back to [`DEFAULT_POLL_INTERVAL_S`]; clamped either way.
    pub poll_interval_s: Option<f64>,
    pub task_id: Option<String>,
}

struct EngineInner<V, F, W, T, S> {
    config: EngineConfig,
    vision: Arc<V>,
    frames: Arc<F>,
    wake: Arc<W>,
    tasks: Arc<T>,
    store: Arc<S>,
    arbiter: CaptureArbiter,
    active: Mutex<HashMap<String, Arc<Mutex<WaitJob>>>>,
    control: Notify,
    shutdown: CancellationToken,
}

/// The smart-wait engine. Cheap to clone; all clones share one scheduler.
pub struct Engine<V, F, W, T, S> {
    inner: Arc<EngineInner<V, F, W, T, S>>,
}

impl<V, F, W, T, S> Clone for Engine<V, F, W, T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, F, W, T, S> Engine<V, F, W, T, S>
where
    V: VisionAdapter + 'static,
    F: FrameSource + 'static,
    W: WakeNotifier + 'static,
    T: TaskSink + 'static,
    S: WaitStore + 'static,
{
    pub fn new(
        config: EngineConfig,
        vision: Arc<V>,
        frames: Arc<F>,
        wake: Arc<W>,
        tasks: Arc<T>,
        store: Arc<S>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                vision,
                frames,
                wake,
                tasks,
                store,
                arbiter: CaptureArbiter::new(),
                active: Mutex::new(HashMap::new()),
                control: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Recover orphaned store records from a previous run, then spawn the
    /// scheduler loop. Orphans are marked terminal without a wake; the
    /// engine never resumes prior jobs.
    pub async fn start(&self) {
        match self.inner.store.recover_interrupted().await {
            Ok(ids) if ids.is_empty() => {}
            Ok(ids) => info!(
                count = ids.len(),
                "marked jobs from previous run as errored: {}",
                ids.join(", ")
            ),
            Err(err) => warn!("startup recovery failed: {err}"),
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_loop(inner).await;
        });
        info!("wait engine started");
    }

    /// Stop the scheduler. In-flight evaluations finish on their own;
    /// no further ticks run.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Register a new wait job. Returns its id.
    pub async fn register(&self, request: WaitRequest) -> Result<String, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        if request.criteria.trim().is_empty() {
            return Err(EngineError::InvalidArg("criteria must not be empty".into()));
        }
        if request.display.trim().is_empty() {
            return Err(EngineError::InvalidArg("display must not be empty".into()));
        }
        let timeout_s = request.timeout_s.unwrap_or(self.inner.config.default_timeout_s);
        if timeout_s == 0 {
            return Err(EngineError::InvalidArg("timeout_s must be positive".into()));
        }
        let poll = self
            .inner
            .config
            .clamp_poll(request.poll_interval_s.unwrap_or(DEFAULT_POLL_INTERVAL_S));

        let id = short_id();
        let job = WaitJob::new(
            id.clone(),
            request.target,
            request.display,
            request.criteria,
            request.task_id.clone(),
            Duration::from_secs(timeout_s),
            poll,
            &self.inner.config,
        );

        self.inner.store.record_created(&job.record()).await?;

        if let Some(task_id) = &request.task_id {
            if let Err(err) = self.inner.tasks.link_wait(task_id, &id).await {
                warn!(job = %id, "failed to link wait to task {task_id}: {err}");
            }
        }

        info!(
            job = %id,
            target = %job.target,
            display = %job.display,
            timeout_s,
            "registered wait: {:?}",
            job.criteria
        );
        self.inner
            .active
            .lock()
            .insert(id.clone(), Arc::new(Mutex::new(job)));
        self.inner.control.notify_one();
        Ok(id)
    }

    /// Snapshot one active job, or all of them.
    pub fn status(&self, id: Option<&str>) -> Result<Vec<WaitSnapshot>, EngineError> {
        let map = self.inner.active.lock();
        match id {
            Some(id) => map
                .get(id)
                .map(|job| vec![job.lock().snapshot()])
                .ok_or_else(|| EngineError::NotFound(id.to_string())),
            None => Ok(map.values().map(|job| job.lock().snapshot()).collect()),
        }
    }

    /// Refine a watching job: replace criteria, reset the deadline, or
    /// append a note. Resets the diff gate and makes the job due now.
    pub async fn update(&self, id: &str, update: WaitUpdate) -> Result<(), EngineError> {
        let job_arc = {
            let map = self.inner.active.lock();
            map.get(id).cloned()
        };
        let Some(job_arc) = job_arc else {
            return match self.inner.store.get(id).await? {
                Some(_) => Err(EngineError::AlreadyTerminal(id.to_string())),
                None => Err(EngineError::NotFound(id.to_string())),
            };
        };

        {
            let mut job = job_arc.lock();
            if let Some(criteria) = update.criteria {
                if criteria.trim().is_empty() {
                    return Err(EngineError::InvalidArg("criteria must not be empty".into()));
                }
                job.criteria = criteria;
            }
            if let Some(timeout_s) = update.timeout_s {
                if timeout_s == 0 {
                    return Err(EngineError::InvalidArg("timeout_s must be positive".into()));
                }
                job.timeout = Duration::from_secs(timeout_s);
                job.deadline = Instant::now() + job.timeout;
            }
            if let Some(note) = update.note {
                job.history.push(note);
            }
            job.diff.reset();
            job.next_check_at = Instant::now();
            debug!(job = %id, notes = job.history.len(), "updated wait: {:?}", job.criteria);
        }
        self.inner.control.notify_one();
        Ok(())
    }

    /// Cancel a watching job. Cancelling an already-terminal job is a
    /// successful no-op; an id the engine has never seen is `NotFound`.
    pub async fn cancel(&self, id: &str, reason: Option<&str>) -> Result<(), EngineError> {
        let is_active = self.inner.active.lock().contains_key(id);
        if is_active {
            let detail = match reason {
                Some(r) if !r.trim().is_empty() => r.to_string(),
                _ => "(no reason)".to_string(),
            };
            finalize(&self.inner, id, WaitStatus::Cancelled, detail).await;
            return Ok(());
        }
        match self.inner.store.get(id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Number of jobs currently watching.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

async fn run_loop<V, F, W, T, S>(inner: Arc<EngineInner<V, F, W, T, S>>)
where
    V: VisionAdapter + 'static,
    F: FrameSource + 'static,
    W: WakeNotifier + 'static,
    T: TaskSink + 'static,
    S: WaitStore + 'static,
{
    loop {
        if inner.shutdown.is_cancelled() {
            info!("wait engine loop stopped");
            return;
        }

        let now = Instant::now();
        let mut expired: Vec<(String, String)> = Vec::new();
        let mut due: Vec<(String, Arc<Mutex<WaitJob>>)> = Vec::new();
        {
            let map = inner.active.lock();
            for (id, job_arc) in map.iter() {
                let job = job_arc.lock();
                if job.deadline <= now {
                    let last = if job.last_detail.is_empty() {
                        String::new()
                    } else {
                        format!(" Last observation: {}", job.last_detail)
                    };
                    expired.push((
                        id.clone(),
                        format!("Timeout after {}s.{last}", job.timeout.as_secs()),
                    ));
                } else if job.next_check_at <= now {
                    due.push((id.clone(), Arc::clone(job_arc)));
                }
            }
        }

        for (id, detail) in expired {
            finalize(&inner, &id, WaitStatus::Timeout, detail).await;
        }

        let mut handles = Vec::with_capacity(due.len());
        for (id, job_arc) in due {
            let inner = Arc::clone(&inner);
            let eval_id = id.clone();
            handles.push((
                id,
                tokio::spawn(async move { evaluate(inner, eval_id, job_arc).await }),
            ));
        }
        for (id, handle) in handles {
            if let Err(err) = handle.await {
                error!(job = %id, "evaluation task died: {err}");
                finalize(
                    &inner,
                    &id,
                    WaitStatus::Error,
                    format!("evaluation failed: {err}"),
                )
                .await;
            }
        }

        // Sleep until the earliest upcoming check or deadline, or until a
        // control event (register/update/cancel) pokes the loop.
        let wake_at = {
            let map = inner.active.lock();
            map.values()
                .map(|job_arc| {
                    let job = job_arc.lock();
                    job.next_check_at.min(job.deadline)
                })
                .min()
        };
        match wake_at {
            Some(at) => {
                tokio::select! {
                    () = inner.shutdown.cancelled() => {}
                    () = inner.control.notified() => {}
                    () = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                }
            }
            None => {
                tokio::select! {
                    () = inner.shutdown.cancelled() => {}
                    () = inner.control.notified() => {}
                }
            }
        }
    }
}

/// One evaluation pass for one job: capture (serialized per display), diff
/// gate, vision call, verdict. Transient capture and vision failures only
/// touch `last_detail` and reschedule; anything unclassified is terminal.
async fn evaluate<V, F, W, T, S>(
    inner: Arc<EngineInner<V, F, W, T, S>>,
    id: String,
    job_arc: Arc<Mutex<WaitJob>>,
) where
    V: VisionAdapter + 'static,
    F: FrameSource + 'static,
    W: WakeNotifier + 'static,
    T: TaskSink + 'static,
    S: WaitStore + 'static,
{
    let (display, target, criteria) = {
        let job = job_arc.lock();
        if job.status.is_terminal() {
            return;
        }
        (job.display.clone(), job.target.clone(), job.criteria.clone())
    };

    let captured = {
        let _guard = inner.arbiter.lock(&display).await;
        inner.frames.capture(&display, &target).await
        // Lock released here; the vision call below runs unserialized.
    };
    let frame = match captured {
        Ok(frame) => frame,
        Err(err) => {
            warn!(job = %id, "capture failed: {err}");
            let mut job = job_arc.lock();
            job.last_detail = format!("capture failed: {err}");
            job.reschedule();
            return;
        }
    };

    let worth_evaluating = {
        let mut job = job_arc.lock();
        let changed = job.diff.should_evaluate(&frame);
        if !changed {
            debug!(
                job = %id,
                ratio = job.diff.last_change_ratio(),
                "no visible change, skipping vision call"
            );
            job.last_detail = "no visible change".to_string();
            job.reschedule();
        }
        changed
    };
    if !worth_evaluating {
        return;
    }

    match inner.vision.evaluate(&frame, &criteria).await {
        Ok(reply) => {
            let verdict = parse_verdict(&reply);
            debug!(job = %id, "verdict: {:?} — {}", verdict.state, verdict.detail);
            match verdict.state {
                VerdictState::Resolved => {
                    finalize(&inner, &id, WaitStatus::Resolved, verdict.detail).await;
                }
                VerdictState::Watching => {
                    let mut job = job_arc.lock();
                    job.last_detail = verdict.detail;
                    job.reschedule();
                }
            }
        }
        Err(EngineError::Vision(msg)) => {
            warn!(job = %id, "vision call failed: {msg}");
            let mut job = job_arc.lock();
            job.last_detail = format!("vision call failed: {msg}");
            job.reschedule();
        }
        Err(err) => {
            error!(job = %id, "evaluation error: {err}");
            finalize(&inner, &id, WaitStatus::Error, err.to_string()).await;
        }
    }
}

/// The single terminal path. Removing the job from the active map under the
/// map lock decides every race (cancel vs. timeout vs. late resolve): only
/// the caller that gets the entry proceeds to commit, post, and wake.
async fn finalize<V, F, W, T, S>(
    inner: &Arc<EngineInner<V, F, W, T, S>>,
    id: &str,
    status: WaitStatus,
    detail: String,
) where
    V: VisionAdapter + 'static,
    F: FrameSource + 'static,
    W: WakeNotifier + 'static,
    T: TaskSink + 'static,
    S: WaitStore + 'static,
{
    debug_assert!(status.is_terminal());
    let Some(job_arc) = inner.active.lock().remove(id) else {
        debug!(job = %id, "terminal {status} lost the race, skipping");
        return;
    };

    let resolved_at = Utc::now();
    let (criteria, task_id, timeout_s) = {
        let mut job = job_arc.lock();
        job.status = status;
        job.last_detail = detail.clone();
        (job.criteria.clone(), job.task_id.clone(), job.timeout.as_secs())
    };
    info!(job = %id, %status, timeout_s, "wait finished: {detail}");

    if let Err(err) = inner
        .store
        .record_terminal(id, status, &detail, resolved_at)
        .await
    {
        warn!(job = %id, "store commit failed: {err}");
    }

    if let Some(task_id) = task_id {
        let content = format!("Wait {status}: {criteria} → {detail}");
        if let Err(err) = inner.tasks.post_wait_message(&task_id, status, &content).await {
            warn!(job = %id, "task message post failed for {task_id}: {err}");
        }
        let update = TaskWaitUpdate {
            remove_id: id.to_string(),
            last_state: status,
            last_event_at: resolved_at.timestamp(),
        };
        if let Err(err) = inner.tasks.update_wait_state(&task_id, &update).await {
            warn!(job = %id, "task wait-state update failed for {task_id}: {err}");
        }
    }

    let prefix = &inner.config.wake_state_prefix;
    let text = match status {
        WaitStatus::Resolved => format!("[{prefix} resolved] {id}: {criteria} → {detail}"),
        WaitStatus::Timeout => format!("[{prefix} timeout] {id}: {criteria} — {detail}"),
        WaitStatus::Cancelled => format!("[{prefix} cancelled] {id}: {criteria} — {detail}"),
        WaitStatus::Error => format!("[{prefix} error] {id}: {criteria} — {detail}"),
        WaitStatus::Watching => return,
    };
    let cap = Duration::from_secs(inner.config.wake_notify_timeout_s);
    match tokio::time::timeout(cap, inner.wake.notify(&text)).await {
        Ok(Ok(())) => debug!(job = %id, "wake dispatched"),
        Ok(Err(err)) => warn!(job = %id, "wake notify failed: {err}"),
        Err(_) => warn!(job = %id, "wake notify timed out after {}s", cap.as_secs()),
    }
}
