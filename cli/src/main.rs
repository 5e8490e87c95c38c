//! RateFeed CLI
//!
//! Runs the refresh scheduler and answers one-off queries against the store.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ratefeed_coordinator::{LogNotifier, RatePipeline, RefreshTask, ServiceConfig};
use ratefeed_store::PgStore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;

use controller::{render, Controller};

/// RateFeed CLI
#[derive(Parser, Debug)]
#[command(name = "ratefeed")]
#[command(about = "Currency-rate ingestion, caching and change detection")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop until Ctrl+C, then print Prometheus metrics
    Run {
        /// Stop after this many seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,
    },
    /// Run one task now: official, marketplace or cache
    Trigger {
        task: RefreshTask,
    },
    /// Evaluate the scheduler once at the current time
    Tick,
    /// Read the aggregated rate list through the cache tiers
    Rates,
    /// Latest VES/USDT marketplace quote
    Latest,
    /// VES/USDT marketplace history, newest first
    History {
        /// Maximum number of quotes
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Latest persisted value per source and currency
    Current,
    /// Probe the store
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = ServiceConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = PgStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;

    let pipeline = RatePipeline::from_config(&config, Arc::new(store), Arc::new(LogNotifier))?;
    let controller = Controller::new(Arc::new(pipeline), config.scheduler.tick_interval);

    match args.command {
        Command::Run { duration } => {
            info!("Starting RateFeed scheduler");
            let duration = (duration > 0).then(|| Duration::from_secs(duration));
            let ticks = controller.run(duration).await?;
            info!(ticks, "RateFeed stopped");
            print!("{}", controller.pipeline().metrics().to_prometheus());
        }
        Command::Trigger { task } => {
            let outcome = controller.trigger(task).await;
            println!("{}", render(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Command::Tick => {
            let report = controller.tick().await;
            println!("{}", render(&report)?);
        }
        Command::Rates => {
            let read = controller.pipeline().read_rates().await?;
            println!("{}", render(&read)?);
        }
        Command::Latest => {
            let quote = controller.pipeline().latest_marketplace_quote().await?;
            println!("{}", render(&quote)?);
        }
        Command::History { limit } => {
            let history = controller.pipeline().marketplace_history(limit).await?;
            println!("{}", render(&history)?);
        }
        Command::Current => {
            let rates = controller.pipeline().current_rates().await?;
            let rows: Vec<_> = rates
                .iter()
                .map(|(key, value)| {
                    serde_json::json!({
                        "source": key.source,
                        "currency": key.currency,
                        "value": value,
                    })
                })
                .collect();
            println!("{}", render(&rows)?);
        }
        Command::Health => {
            let report = controller.pipeline().health().await;
            println!("{}", render(&report)?);
        }
    }

    Ok(())
}
