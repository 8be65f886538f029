//! Nodeboot -- per-node boot coordinator for a gossip-clustered
//! key-value store.
//!
//! Two commands, both reading the same JSON configuration: `start`
//! (with a server/client mode flag) and `stop`. The boot path is
//! fail-fast; the stop path is best-effort teardown.

use clap::{Parser, Subcommand};
use tracing::info;

use nodeboot::config::AgentMode;
use nodeboot::controller::Controller;

/// Command-line arguments for the nodeboot coordinator.
#[derive(Parser, Debug)]
#[command(
    name = "nodeboot",
    version,
    about = "Per-node boot coordinator for a gossip-clustered key-value store"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "nodeboot.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot the local agent and drive it to confirmed membership.
    Start {
        /// Run the agent as a consensus server or as a client.
        #[arg(short, long, value_enum)]
        mode: Option<AgentMode>,
    },
    /// Leave the cluster and tear the local agent down.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}", cli.config);
    let mut config = nodeboot::config::load_config(&cli.config)?;

    match cli.command {
        Command::Start { mode } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let controller = Controller::with_defaults(config)
                .map_err(|e| anyhow::anyhow!("start failed during setup: {e}"))?;
            controller
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("start failed: {e}"))?;
        }
        Command::Stop => {
            let controller = Controller::with_defaults(config)
                .map_err(|e| anyhow::anyhow!("stop failed during setup: {e}"))?;
            controller
                .stop()
                .await
                .map_err(|e| anyhow::anyhow!("stop failed: {e}"))?;
        }
    }

    Ok(())
}
