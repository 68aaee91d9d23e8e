//! feedpulse service binary
//!
//! Periodically polls a link-aggregation forum and a microblog search
//! API, deduplicates the results into a local SQLite store, and serves
//! on-demand refreshes. The daemon runs until SIGTERM/Ctrl-C.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feedpulse::config::Config;
use feedpulse::coordinator::Coordinator;
use feedpulse::scheduler::PollScheduler;
use feedpulse::store::Store;

/// feedpulse - forum and microblog polling with deduplicated storage
#[derive(Parser, Debug)]
#[command(name = "feedpulse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Forum and microblog polling service with deduplicated local storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the polling service (periodic cycles until shutdown)
    Run,

    /// Run one poll cycle now and print the summary
    Refresh {
        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        output: String,
    },

    /// Show configured sources and stored row counts
    Status,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Handles graceful shutdown on SIGTERM/SIGINT
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    // Signal all tasks to shutdown
    let _ = shutdown_tx.send(());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting feedpulse");

    let config = Config::load()?;
    config.validate()?;

    info!(
        forum_api = %config.forum_api_url,
        primary_channel = %config.forum_primary_channel,
        secondary_channels = config.secondary_channels().len(),
        microblog_configured = config.has_microblog(),
        database = %config.database_path.display(),
        interval_minutes = config.poll_interval_minutes,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run => run_service(config).await?,
        Commands::Refresh { output } => refresh_once(config, &output).await?,
        Commands::Status => show_status(config).await?,
    }

    Ok(())
}

/// Runs the polling daemon until shutdown
async fn run_service(config: Config) -> Result<()> {
    let store = Store::open(&config.database_path).await?;
    let coordinator = Arc::new(Coordinator::from_config(&config, store.clone())?);
    let scheduler = PollScheduler::new(coordinator, config.poll_interval());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let signal_handle = tokio::spawn(shutdown_signal(shutdown_tx));

    info!("feedpulse initialized, entering poll loop");

    if let Err(e) = scheduler.run(shutdown_rx).await {
        error!(error = %e, "Scheduler failed");
        store.close().await;
        return Err(e.into());
    }

    let _ = signal_handle.await;
    store.close().await;

    info!("feedpulse stopped");
    Ok(())
}

/// Runs a single poll cycle from the command line
async fn refresh_once(config: Config, output_format: &str) -> Result<()> {
    let store = Store::open(&config.database_path).await?;
    let coordinator = Arc::new(Coordinator::from_config(&config, store.clone())?);
    let scheduler = PollScheduler::new(coordinator, config.poll_interval());

    let summary = scheduler.trigger_refresh_now().await?;

    match output_format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            println!("\nRefresh Summary");
            println!("===============");
            for source in &summary.report.sources {
                let status = if source.skipped {
                    "skipped"
                } else if source.succeeded() {
                    "ok"
                } else {
                    "partial"
                };
                println!(
                    "  - {:<10} {:>4} fetched, {:>4} inserted [{}]",
                    source.source, source.fetched, source.inserted, status
                );
                for failure in &source.failures {
                    println!("      ! {}: {}", failure.endpoint, failure.reason);
                }
            }

            println!("\nStored rows:");
            for total in &summary.totals {
                println!("  - {}: {}", total.source, total.count);
            }
        }
    }

    store.close().await;
    Ok(())
}

/// Shows configured sources and store contents
async fn show_status(config: Config) -> Result<()> {
    println!("\nfeedpulse status");
    println!("================\n");

    println!("Configured sources:");
    println!(
        "  - Forum:     {} (primary channel {}, {} secondary)",
        config.forum_api_url,
        config.forum_primary_channel,
        config.secondary_channels().len()
    );
    println!(
        "  - Microblog: {}",
        if config.has_microblog() {
            "configured"
        } else {
            "not configured (no bearer token)"
        }
    );

    let store = Store::open(&config.database_path).await?;
    let counts = store.count_by_source().await?;

    println!("\nStored rows ({}):", config.database_path.display());
    if counts.is_empty() {
        println!("  No items yet");
    } else {
        for count in &counts {
            println!("  - {}: {}", count.source, count.count);
        }
    }

    let recent = store.list_all().await?;
    if let Some(newest) = recent.first() {
        println!(
            "\nNewest item: {} ({})",
            newest.id,
            newest.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    store.close().await;
    Ok(())
}
