use anyhow::Result;
use tracing::warn;

use vigil_claw_infra::{SqliteWaitStore, X11FrameSource};

use vigil_claw_app::bootstrap;
use vigil_claw_app::config::Config;

pub async fn run() -> Result<()> {
    println!("🏥 Health Check\n");

    let config = Config::load()?;
    let mut healthy = true;

    print!("🗄  Database... ");
    match SqliteWaitStore::new(&config.database) {
        Ok(_) => println!("✓"),
        Err(e) => {
            println!("✗ ({e})");
            healthy = false;
        }
    }

    print!("📸 Capture backend... ");
    if X11FrameSource::backend_available().await {
        println!("✓");
    } else {
        println!("✗ (install 'maim' or ImageMagick 'import')");
        healthy = false;
    }

    print!("🌐 Vision endpoint... ");
    let runtime = bootstrap::build(&config)?;
    match runtime.vision.check_health().await {
        Ok(()) => println!("✓"),
        Err(e) => {
            warn!("vision health probe failed: {e}");
            println!("✗ ({e})");
            healthy = false;
        }
    }

    print!("🔔 Wake CLI... ");
    if which(&config.wake_cli).await {
        println!("✓");
    } else {
        println!("✗ ('{}' not on PATH)", config.wake_cli);
        healthy = false;
    }

    println!();
    if healthy {
        println!("✅ All checks passed");
        Ok(())
    } else {
        anyhow::bail!("Health check failed");
    }
}

async fn which(command: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(command)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
