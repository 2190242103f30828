//! Wake delivery via the agent host CLI.
//!
//! The hosting agent exposes a `system event` subcommand that injects a
//! message into its conversation loop; one spawn per terminal wait is all
//! the engine needs. The spawn is capped so a hung CLI cannot stall the
//! terminal path.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use vigil_claw_engine::{EngineError, WakeNotifier};

pub struct CliWakeNotifier {
    cli: String,
    timeout: Duration,
}

impl CliWakeNotifier {
    pub fn new(cli: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cli: cli.into(),
            timeout,
        }
    }
}

#[async_trait]
impl WakeNotifier for CliWakeNotifier {
    async fn notify(&self, text: &str) -> Result<(), EngineError> {
        let spawn = Command::new(&self.cli)
            .args(["system", "event", "--text", text, "--mode", "now"])
            .output();

        let output = tokio::time::timeout(self.timeout, spawn)
            .await
            .map_err(|_| {
                EngineError::Wake(format!(
                    "wake command timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| EngineError::Wake(format!("failed to spawn {}: {e}", self.cli)))?;

        if !output.status.success() {
            return Err(EngineError::Wake(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        debug!("wake event injected: {:.80}", text);
        Ok(())
    }
}
