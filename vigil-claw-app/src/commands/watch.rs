use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use vigil_claw_engine::{EngineError, WaitRequest, WaitStatus, WaitStore, WaitTarget};

use vigil_claw_app::bootstrap;
use vigil_claw_app::config::Config;

use crate::WatchArgs;

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = Config::load()?;
    let runtime = bootstrap::build(&config)?;
    runtime.engine.start().await;

    let target: WaitTarget = args.target.parse()?;
    let display = args.display.unwrap_or_else(|| config.display.clone());

    let id = runtime
        .engine
        .register(WaitRequest {
            target,
            display,
            criteria: args.criteria.clone(),
            timeout_s: args.timeout,
            poll_interval_s: args.interval,
            task_id: args.task,
        })
        .await?;

    info!(job = %id, "wait registered from CLI");
    println!("⏳ {id}: waiting until {:?}", args.criteria);

    // The job leaves the active set exactly once, at its terminal
    // transition; the store has the outcome from then on.
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match runtime.engine.status(Some(&id)) {
            Ok(_) => {}
            Err(EngineError::NotFound(_)) => break,
            Err(err) => return Err(err.into()),
        }
    }
    runtime.engine.shutdown();

    let record = runtime
        .store
        .get(&id)
        .await?
        .context("job finished without a store record")?;
    info!(job = %id, status = %record.status, "watch finished");

    match record.status {
        WaitStatus::Resolved => {
            println!("✅ resolved: {}", record.detail);
            Ok(())
        }
        status => {
            println!("✗ {status}: {}", record.detail);
            std::process::exit(1);
        }
    }
}
