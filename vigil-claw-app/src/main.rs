use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "vigil-claw")]
#[command(about = "Visual smart-wait daemon for autonomous agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize vigil-claw configuration
    Init,
    /// Register a wait and block until it finishes
    Watch(WatchArgs),
    /// Check system health
    Health,
}

#[derive(Args)]
pub(crate) struct WatchArgs {
    /// What to capture: screen, window:<id-or-name>, or pty:<session>
    #[arg(long, default_value = "screen")]
    pub(crate) target: String,
    /// Natural-language condition to wake on
    #[arg(long = "when")]
    pub(crate) criteria: String,
    /// Give up after this many seconds
    #[arg(long)]
    pub(crate) timeout: Option<u64>,
    /// Base polling interval in seconds
    #[arg(long)]
    pub(crate) interval: Option<f64>,
    /// X display to read from (defaults to the configured display)
    #[arg(long)]
    pub(crate) display: Option<String>,
    /// Task id to auto-report into
    #[arg(long)]
    pub(crate) task: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Watch(args) => commands::watch::run(args).await,
        Commands::Health => commands::health::run().await,
    }
}
