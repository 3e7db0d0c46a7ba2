use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use subforge::app::SyncEngine;
use subforge::config;

#[derive(Parser)]
#[command(
    name = "subforge",
    version,
    about = "Subscription aggregation and curation pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, default_value = "subforge.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass (default when no subcommand given)
    Sync,

    /// Serve the HTTP facade, optionally re-syncing on an interval
    Serve {
        /// Re-run the sync pipeline every N seconds
        #[arg(long)]
        sync_every: Option<u64>,
    },

    /// Validate config file syntax and semantics
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => cmd_check(&cli.config),
        Some(Commands::Serve { sync_every }) => cmd_serve(&cli.config, sync_every).await,
        Some(Commands::Sync) | None => cmd_sync(&cli.config).await,
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn cmd_sync(config_path: &str) -> Result<()> {
    let config = config::load_config(config_path)?;
    init_tracing(&config.log.level);

    if config.subscriptions.iter().filter(|s| s.enabled).count() == 0 {
        warn!("no enabled subscriptions configured");
    }

    let engine = SyncEngine::with_default_sinks(config);
    match engine.run().await {
        Ok(outcome) => {
            info!(
                input = outcome.input_node_count,
                valid = outcome.valid_node_count,
                final_count = outcome.final_node_count,
                artifacts = outcome.artifacts_written,
                skipped_sources = outcome.source_errors.len(),
                "sync finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "sync failed");
            std::process::exit(1);
        }
    }
}

async fn cmd_serve(config_path: &str, sync_every: Option<u64>) -> Result<()> {
    let config = config::load_config(config_path)?;
    init_tracing(&config.log.level);

    let _api = subforge::api::start(&config)?;

    if let Some(secs) = sync_every {
        let engine = SyncEngine::with_default_sinks(config);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(secs.max(60)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = engine.run().await {
                        // 定时模式下单轮失败不退出，等下一轮
                        error!(error = %e, "scheduled sync failed");
                    }
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, no more syncs scheduled");
                    break;
                }
            }
        }
    } else {
        shutdown_signal().await;
        info!("shutdown signal received");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn cmd_check(config_path: &str) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            let enabled = config.subscriptions.iter().filter(|s| s.enabled).count();
            println!(
                "OK: {} subscriptions ({} enabled), output -> {}",
                config.subscriptions.len(),
                enabled,
                config.emit.output_dir.display()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("config invalid: {e:#}");
            std::process::exit(1);
        }
    }
}
