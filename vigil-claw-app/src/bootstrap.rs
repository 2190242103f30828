//! Wires concrete backends into one engine instance.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use vigil_claw_engine::{Engine, EngineConfig};
use vigil_claw_infra::{
    CliWakeNotifier, HttpVisionAdapter, SqliteTaskSink, SqliteWaitStore, VisionEndpoint,
    X11FrameSource,
};

use crate::config::Config;

pub type WaitEngine = Engine<
    HttpVisionAdapter,
    X11FrameSource,
    CliWakeNotifier,
    SqliteTaskSink,
    SqliteWaitStore,
>;

/// An assembled daemon: the engine plus the store handle the CLI reads
/// terminal outcomes from.
pub struct Runtime {
    pub engine: WaitEngine,
    pub store: Arc<SqliteWaitStore>,
    pub vision: Arc<HttpVisionAdapter>,
}

pub fn build(config: &Config) -> Result<Runtime> {
    let engine_config = EngineConfig::from_env();
    info!(
        database = %config.database.display(),
        display = %config.display,
        vision = %config.vision.base_url,
        "assembling wait engine"
    );

    let store = Arc::new(SqliteWaitStore::new(&config.database)?);
    let tasks = Arc::new(SqliteTaskSink::new(&config.database)?);
    let vision = Arc::new(HttpVisionAdapter::new(VisionEndpoint {
        base_url: config.vision.base_url.clone(),
        model: config.vision.model.clone(),
        api_key: config.vision.api_key.clone(),
        max_retries: config.vision.max_retries,
    }));
    let wake = Arc::new(CliWakeNotifier::new(
        &config.wake_cli,
        Duration::from_secs(engine_config.wake_notify_timeout_s),
    ));
    let frames = Arc::new(X11FrameSource::new());

    let engine = Engine::new(
        engine_config,
        Arc::clone(&vision),
        frames,
        wake,
        tasks,
        Arc::clone(&store),
    );

    Ok(Runtime {
        engine,
        store,
        vision,
    })
}
