//! cocaine-node — node service CLI.
//!
//! Subcommands:
//! - `cocaine-node serve` — run the node service (loads config, starts
//!   the app registry; the RPC acceptor itself is external to this crate)
//! - `cocaine-node start <name> <executable>` — ad-hoc single-app run,
//!   useful for local testing without a client/acceptor in front
//!
//! Configuration is loaded from (in order, later wins):
//! 1. Compiled defaults
//! 2. /etc/cocaine/config.toml
//! 3. ~/.config/cocaine/config.toml
//! 4. ./cocaine.toml (or --config path)
//! 5. Environment variables (COCAINE_*)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cocaine_config::CocaineConfig;
use cocaine_node::telemetry;
use std::path::PathBuf;

/// Node service for the cocaine application runtime.
#[derive(Parser)]
#[command(name = "cocaine-node")]
#[command(about = "Runs the node service: per-app worker pools behind enqueue/info")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides ./cocaine.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show loaded configuration and exit
    ShowConfig,

    /// Run the node service with telemetry wired up
    Serve,

    /// Start a single app and hold the process open (no acceptor; for
    /// smoke-testing an isolate/manifest pairing locally)
    Start {
        /// App name
        name: String,

        /// Worker executable path
        executable: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) =
        CocaineConfig::load_with_sources_from(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::ShowConfig => {
            telemetry::init_plain(&config.infra.telemetry.log_level);
            println!("# Configuration sources:");
            for path in &sources.files {
                println!("#   - {}", path.display());
            }
            if !sources.env_overrides.is_empty() {
                println!("# Environment overrides:");
                for var in &sources.env_overrides {
                    println!("#   - {var}");
                }
            }
            println!();
            println!("runtime_dir = {}", config.infra.paths.runtime_dir.display());
            println!("bind = {}", config.infra.bind.tcp_addr);
            Ok(())
        }
        Commands::Serve => {
            telemetry::init(&config.infra.telemetry.otlp_endpoint, &config.infra.telemetry.log_level)
                .context("failed to initialize telemetry")?;
            tracing::info!(bind = %config.infra.bind.tcp_addr, "node service configuration loaded");
            for path in &sources.files {
                tracing::info!(path = %path.display(), "config file applied");
            }

            let node = cocaine_node::Node::new(config);
            // The RPC acceptor that would drive `node.enqueue`/`node.list`
            // over the wire lives outside this crate; hold the process
            // open so the registered Overseers' strands keep running for
            // whatever embeds this binary, until asked to stop.
            tracing::info!("node service ready");
            tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
            tracing::info!("shutting down");
            for name in node.list().await {
                node.stop_app(&name).await.ok();
            }
            Ok(())
        }
        Commands::Start { name, executable } => {
            telemetry::init_plain(&config.infra.telemetry.log_level);
            let node = cocaine_node::Node::new(config);
            node.start_app(name.clone(), executable, None).await?;
            tracing::info!(app = %name, "app started, holding process open");
            tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
            node.stop_app(&name).await?;
            Ok(())
        }
    }
}
