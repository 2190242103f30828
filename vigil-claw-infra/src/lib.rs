//! Vigil-Claw Infra
//!
//! Production backends for the engine's capability seams: a SQLite job
//! store and task sink, an OpenAI-compatible HTTP vision client, an X11
//! subprocess frame source, and a CLI-spawning wake notifier.

pub mod capture;
pub mod store;
pub mod task_sink;
pub mod vision;
pub mod wake;

pub use capture::X11FrameSource;
pub use store::SqliteWaitStore;
pub use task_sink::SqliteTaskSink;
pub use vision::{HttpVisionAdapter, VisionEndpoint};
pub use wake::CliWakeNotifier;
