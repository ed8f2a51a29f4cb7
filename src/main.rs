use anyhow::Context;
use barrierbot::api::{SettlementClient, SubgraphClient, SubgraphFeed};
use barrierbot::config::BotConfig;
use barrierbot::execution::{Engine, EngineSettings};
use barrierbot::models::InstrumentKind;
use barrierbot::persistence::{PriceIndex, RedisBackend, StoreBackend};
use barrierbot::redeem::RedeemWorker;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "barrierbot")]
#[command(about = "Barrier-trigger execution bot for knock-in options and vault liquidations")]
struct Cli {
    /// Optional config file (toml/yaml/json), layered under BOT_* env vars
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot for one instrument kind until Ctrl+C
    Run {
        #[arg(value_enum)]
        kind: InstrumentKind,
    },
    /// Show partition counts and price index state
    Status {
        #[arg(value_enum)]
        kind: InstrumentKind,
    },
    /// Drop the shared price index; the next run re-ingests from the feed
    ResetPrices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let backend: Arc<dyn StoreBackend> = Arc::new(
        RedisBackend::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );

    match cli.command {
        Commands::Run { kind } => run(kind, &config, backend).await?,
        Commands::Status { kind } => {
            let client = SubgraphClient::new(config.feed_requests_per_second)?;
            let status = build_engine(&client, kind, &config, backend)?.status().await?;
            tracing::info!("📊 {} status:", kind);
            tracing::info!("  Pending: {} ({} triggered)", status.pending, status.triggered);
            tracing::info!("  Failed (retrying): {}", status.failed);
            tracing::info!("  Indexed prices: {}", status.prices);
            match status.latest_price_timestamp {
                Some(ts) => tracing::info!("  Latest price at: {}", ts),
                None => tracing::info!("  Latest price at: -"),
            }
        }
        Commands::ResetPrices => {
            let index = PriceIndex::new(backend, &config.price_key);
            let count = index.count().await?;
            index.clear().await?;
            tracing::info!("🧹 Cleared {} samples from {}", count, config.price_key);
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("barrierbot=info")),
        )
        .init();
}

/// Feeds built from one client share its rate limiter
fn subgraph_feed(client: &SubgraphClient, kind: InstrumentKind, config: &BotConfig) -> SubgraphFeed {
    SubgraphFeed::new(
        client.clone(),
        &config.price_feed_url,
        config.instrument_feed_url(kind),
        kind,
    )
    .with_ignored_owners(config.redeem_ignored_owners.clone())
}

fn build_engine(
    client: &SubgraphClient,
    kind: InstrumentKind,
    config: &BotConfig,
    backend: Arc<dyn StoreBackend>,
) -> barrierbot::Result<Engine> {
    let feed = Arc::new(subgraph_feed(client, kind, config));
    let settlement = Arc::new(SettlementClient::new(
        &config.settlement_url,
        config.execution_timeout(),
    )?);

    Ok(Engine::new(
        backend,
        &config.price_key,
        feed.clone(),
        feed,
        settlement,
        EngineSettings::from(config),
    ))
}

async fn run(kind: InstrumentKind, config: &BotConfig, backend: Arc<dyn StoreBackend>) -> anyhow::Result<()> {
    tracing::info!("🚀 barrierbot starting ({})", kind);
    tracing::info!("  Poll interval: {:?}", config.poll_interval());
    tracing::info!("  Execution timeout: {:?}", config.execution_timeout());
    tracing::info!("  Price key: {}", config.price_key);

    let client = SubgraphClient::new(config.feed_requests_per_second)?;
    let engine = build_engine(&client, kind, config, backend.clone())?;
    let ctx = engine.restore_context().await?;
    let shutdown = CancellationToken::new();

    let engine_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(ctx, shutdown).await })
    };

    let redeem_task = if kind == InstrumentKind::Option {
        let worker = RedeemWorker::new(
            Arc::new(subgraph_feed(&client, kind, config)),
            Arc::new(SettlementClient::new(
                &config.settlement_url,
                config.execution_timeout(),
            )?),
            backend,
            kind.namespace(),
        );
        let since = worker.restore_cursor().await?;
        let interval = config.poll_interval();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(since, interval, shutdown).await }))
    } else {
        None
    };

    tracing::info!("Press Ctrl+C to stop...");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, finishing current tick...");
    shutdown.cancel();

    let ctx = engine_task.await.context("Engine task panicked")?;
    tracing::info!(
        ingest = ctx.last_ingest_timestamp,
        listing = ctx.last_listing_timestamp,
        execution = ctx.last_execution_timestamp,
        "Final cursors"
    );
    if let Some(task) = redeem_task {
        task.await.context("Redeem task panicked")?;
    }

    tracing::info!("👋 barrierbot stopped");
    Ok(())
}
