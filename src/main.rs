//! Newswire ingestion service entrypoint

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use newswire_ingestion::config::Config;
use newswire_ingestion::orchestrator::Orchestrator;
use newswire_ingestion::sources::FetchRequest;
use newswire_ingestion::{metrics, ReferenceClock};

/// Newswire ingestion service - quota-aware news harvesting
#[derive(Parser, Debug)]
#[command(name = "newswire-ingestion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quota-aware news ingestion with deduplication and adaptive caching")]
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
    /// Start the ingestion service (refresh loop, warmup, housekeeping)
    Run,

    /// Fetch a single category and print the articles
    Fetch {
        /// Category to fetch
        #[arg(short, long, default_value = "general")]
        category: String,

        /// Two-letter region filter (e.g. "in")
        #[arg(short, long)]
        region: Option<String>,

        /// Maximum number of articles
        #[arg(short = 'n', long, default_value = "10")]
        limit: u32,

        /// Fetch from a single provider, bypassing cache and dedup
        #[arg(short, long)]
        source: Option<String>,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        output: String,
    },

    /// Show quota, circuit breaker, and cache status
    Status,

    /// Invalidate cached categories for a real-world event
    Invalidate {
        /// Event name (market_open, sports_event, breaking_news,
        /// election_result)
        #[arg(short, long)]
        event: String,
    },
}

fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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

/// Resolves on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn build_orchestrator(
    config: Config,
) -> Result<(
    Arc<Orchestrator>,
    tokio::sync::mpsc::Receiver<newswire_ingestion::cache::WarmupRequest>,
)> {
    let clock = ReferenceClock::system(config.timezone_offset_minutes);
    let store = Orchestrator::connect_store(&config).await?;
    let (orchestrator, warmup_rx) = Orchestrator::new(config, clock, store).await?;
    Ok((Arc::new(orchestrator), warmup_rx))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting newswire ingestion");

    let config = Config::load()?;
    if !config.has_any_provider() {
        warn!("no provider API keys configured; fetches will fail");
    }

    match cli.command {
        Commands::Run => run_service(config).await?,

        Commands::Fetch {
            category,
            region,
            limit,
            source,
            output,
        } => {
            let (orchestrator, _warmup_rx) = build_orchestrator(config).await?;
            let mut request = FetchRequest::new(category).limit(limit);
            if let Some(region) = region {
                request = request.region(region);
            }

            let articles = match source {
                Some(ref provider_id) => {
                    orchestrator.fetch_from_provider(provider_id, &request).await?
                }
                None => orchestrator.fetch_category(&request).await?,
            };
            match output.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&articles)?),
                _ => {
                    println!("Fetched {} articles:", articles.len());
                    for article in &articles {
                        println!(
                            "  [{}] {} ({})",
                            article.source, article.title, article.published_at
                        );
                    }
                }
            }
        }

        Commands::Status => {
            let (orchestrator, _warmup_rx) = build_orchestrator(config).await?;
            let status = orchestrator.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Invalidate { event } => {
            let (orchestrator, _warmup_rx) = build_orchestrator(config).await?;
            let deleted = orchestrator.invalidate_event(&event).await?;
            println!("Invalidated {} cached entries for event '{}'", deleted, event);
        }
    }

    Ok(())
}

/// Daemon mode: background loops plus the metrics server, until a
/// shutdown signal arrives.
async fn run_service(config: Config) -> Result<()> {
    let metrics_enabled = config.metrics_enabled;
    let metrics_port = config.metrics_port;

    let (orchestrator, warmup_rx) = build_orchestrator(config).await?;
    info!(
        providers = orchestrator.provider_count(),
        "orchestrator initialized"
    );

    let handles = orchestrator.spawn_background(warmup_rx);

    if metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], metrics_port).into();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(addr).await {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    shutdown_signal().await;

    for handle in handles {
        handle.abort();
    }
    info!("newswire ingestion stopped");
    Ok(())
}
