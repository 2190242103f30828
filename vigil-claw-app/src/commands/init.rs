use anyhow::Result;
use tracing::info;

use vigil_claw_app::config::Config;

pub fn run() -> Result<()> {
    if Config::exists() {
        println!("Config already exists at {}", Config::path());
        return Ok(());
    }

    let config = Config::default();
    config.save()?;
    info!("wrote default config to {}", Config::path());

    println!("✅ Wrote {}", Config::path());
    println!();
    println!("Edit it to point at your vision model server and agent CLI:");
    println!("  vision.base_url  {}", config.vision.base_url);
    println!("  vision.model     {}", config.vision.model);
    println!("  wake_cli         {}", config.wake_cli);
    println!("  display          {}", config.display);
    Ok(())
}
