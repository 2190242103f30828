//! Vigil-Claw Engine
//!
//! The smart-wait scheduler: wait jobs, per-display capture arbitration,
//! vision verdicts, and exactly-once terminal notifications. Backends
//! (vision model, frame capture, wake delivery, task memory, persistence)
//! plug in through the seam traits in [`interfaces`].

pub mod arbiter;
pub mod diff_gate;
pub mod engine;
pub mod interfaces;
mod job;
pub mod types;
pub mod verdict;

pub use arbiter::CaptureArbiter;
pub use diff_gate::DiffGate;
pub use engine::{Engine, WaitRequest, DEFAULT_POLL_INTERVAL_S};
pub use interfaces::{
    EngineError, FrameSource, TaskSink, TaskWaitUpdate, VisionAdapter, WaitRecord, WaitStore,
    WakeNotifier,
};
pub use types::{
    EngineConfig, Frame, Verdict, VerdictState, WaitSnapshot, WaitStatus, WaitTarget, WaitUpdate,
};
pub use verdict::parse_verdict;
