//! In-memory wait job record.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::diff_gate::DiffGate;
use crate::interfaces::WaitRecord;
use crate::types::{EngineConfig, WaitSnapshot, WaitStatus, WaitTarget};

/// A single registered wait. Owned by the engine's active map and only ever
/// touched under its per-job lock; nothing outside the engine holds one.
#[derive(Debug)]
pub(crate) struct WaitJob {
    pub id: String,
    pub target: WaitTarget,
    pub display: String,
    pub criteria: String,
    pub task_id: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub created_at: Instant,
    pub created_wall: DateTime<Utc>,
    pub deadline: Instant,
    pub next_check_at: Instant,
    pub status: WaitStatus,
    pub last_detail: String,
    /// Notes appended through `update`.
    pub history: Vec<String>,
    pub diff: DiffGate,
}

impl WaitJob {
    pub fn new(
        id: String,
        target: WaitTarget,
        display: String,
        criteria: String,
        task_id: Option<String>,
        timeout: Duration,
        poll_interval: Duration,
        config: &EngineConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            target,
            display,
            criteria,
            task_id,
            timeout,
            poll_interval,
            created_at: now,
            created_wall: Utc::now(),
            deadline: now + timeout,
            next_check_at: now,
            status: WaitStatus::Watching,
            last_detail: String::new(),
            history: Vec::new(),
            diff: DiffGate::new(
                config.diff_downsample_width,
                config.diff_pixel_threshold,
                config.diff_change_ratio,
            ),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Push the next evaluation out by the job's polling interval.
    pub fn reschedule(&mut self) {
        self.next_check_at = Instant::now() + self.poll_interval;
    }

    pub fn snapshot(&self) -> WaitSnapshot {
        WaitSnapshot {
            id: self.id.clone(),
            status: self.status,
            elapsed_s: self.elapsed().as_secs(),
            target: self.target.to_string(),
            criteria: self.criteria.clone(),
            last_detail: self.last_detail.clone(),
            timeout_s: self.timeout.as_secs(),
            task_id: self.task_id.clone(),
        }
    }

    pub fn record(&self) -> WaitRecord {
        WaitRecord {
            id: self.id.clone(),
            task_id: self.task_id.clone(),
            target: self.target.clone(),
            criteria: self.criteria.clone(),
            timeout_s: self.timeout.as_secs(),
            poll_interval_s: self.poll_interval.as_secs_f64(),
            status: self.status,
            detail: self.last_detail.clone(),
            created_at: self.created_wall,
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> WaitJob {
        WaitJob::new(
            "w1".to_string(),
            WaitTarget::Screen,
            ":1".to_string(),
            "download complete".to_string(),
            None,
            Duration::from_secs(60),
            Duration::from_secs(1),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_new_job_is_watching_and_due() {
        let job = job();
        assert_eq!(job.status, WaitStatus::Watching);
        assert!(job.next_check_at <= Instant::now());
        assert!(job.deadline > Instant::now());
    }

    #[test]
    fn test_reschedule_pushes_next_check() {
        let mut job = job();
        job.reschedule();
        assert!(job.next_check_at > Instant::now());
    }

    #[test]
    fn test_snapshot_fields() {
        let job = job();
        let snap = job.snapshot();
        assert_eq!(snap.id, "w1");
        assert_eq!(snap.target, "screen");
        assert_eq!(snap.criteria, "download complete");
        assert_eq!(snap.timeout_s, 60);
        assert!(snap.task_id.is_none());
    }
}
