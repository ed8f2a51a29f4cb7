use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ExecutionCoordinator, InstrumentIngestor, PriceIngestor, TriggerMatcher};
use crate::api::{ActionExecutor, InstrumentFeed, PriceFeed};
use crate::config::BotConfig;
use crate::models::{InstrumentKind, Partition};
use crate::persistence::{InstrumentStore, PriceIndex, StoreBackend};
use crate::Result;

/// Cursors carried from one tick to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickContext {
    pub last_ingest_timestamp: i64,
    pub last_listing_timestamp: i64,
    pub last_execution_timestamp: i64,
}

/// Per-tick counters, logged once per tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fetched: usize,
    pub listed: usize,
    pub matched: usize,
    pub executed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub errored: usize,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    pub first_page_size: usize,
    pub page_size: usize,
    pub price_page_size: usize,
}

impl From<&BotConfig> for EngineSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            execution_timeout: config.execution_timeout(),
            first_page_size: config.first_page_size,
            page_size: config.page_size,
            price_page_size: config.price_page_size,
        }
    }
}

/// Snapshot of the store for one engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub pending: usize,
    pub triggered: usize,
    pub failed: usize,
    pub prices: usize,
    pub latest_price_timestamp: Option<i64>,
}

/// Barrier-trigger engine for one instrument kind
///
/// Each tick runs price ingestion, listing ingestion, matching and execution
/// in that order. The phases never interleave.
pub struct Engine {
    kind: InstrumentKind,
    index: PriceIndex,
    store: InstrumentStore,
    prices: PriceIngestor,
    listings: InstrumentIngestor,
    matcher: TriggerMatcher,
    coordinator: ExecutionCoordinator,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        price_key: &str,
        price_feed: Arc<dyn PriceFeed>,
        instrument_feed: Arc<dyn InstrumentFeed>,
        executor: Arc<dyn ActionExecutor>,
        settings: EngineSettings,
    ) -> Self {
        let kind = instrument_feed.kind();
        let index = PriceIndex::new(backend.clone(), price_key);
        let store = InstrumentStore::new(backend, kind.namespace());

        Self {
            kind,
            prices: PriceIngestor::new(price_feed, index.clone(), settings.price_page_size),
            listings: InstrumentIngestor::new(
                instrument_feed,
                store.clone(),
                settings.first_page_size,
                settings.page_size,
            ),
            matcher: TriggerMatcher::new(index.clone(), store.clone()),
            coordinator: ExecutionCoordinator::new(executor, store.clone(), settings.execution_timeout),
            index,
            store,
            poll_interval: settings.poll_interval,
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Rebuild cursors from what the store already holds
    pub async fn restore_context(&self) -> Result<TickContext> {
        let ctx = TickContext {
            last_ingest_timestamp: self.index.latest_timestamp().await?.unwrap_or(0),
            last_listing_timestamp: self.store.listing_high_water().await?.unwrap_or(0),
            last_execution_timestamp: self.store.settled_high_water().await?.unwrap_or(0),
        };
        tracing::info!(
            kind = %self.kind,
            ingest = ctx.last_ingest_timestamp,
            listing = ctx.last_listing_timestamp,
            execution = ctx.last_execution_timestamp,
            "Restored cursors"
        );
        Ok(ctx)
    }

    /// One full ingest → match → execute pass
    ///
    /// On error the caller keeps the previous context; every phase is safe to
    /// replay.
    pub async fn tick(&self, ctx: TickContext, now: i64) -> Result<(TickContext, TickSummary)> {
        let (last_ingest_timestamp, prices) = self.prices.ingest(ctx.last_ingest_timestamp).await?;
        let (last_listing_timestamp, listing) =
            self.listings.ingest(ctx.last_listing_timestamp).await?;

        let scan = self.matcher.scan(ctx.last_execution_timestamp, now).await?;
        let report = self
            .coordinator
            .run(scan.candidates, ctx.last_execution_timestamp)
            .await?;

        let next = TickContext {
            last_ingest_timestamp,
            last_listing_timestamp,
            last_execution_timestamp: report.last_execution_timestamp.max(ctx.last_execution_timestamp),
        };
        let summary = TickSummary {
            fetched: prices.fetched,
            listed: listing.listed,
            matched: scan.matched,
            executed: report.executed,
            failed: report.failed,
            unreachable: report.unreachable,
            errored: report.errored,
        };

        tracing::info!(
            kind = %self.kind,
            fetched = summary.fetched,
            listed = summary.listed,
            matched = summary.matched,
            executed = summary.executed,
            failed = summary.failed,
            unreachable = summary.unreachable,
            errored = summary.errored,
            "Tick complete"
        );
        Ok((next, summary))
    }

    /// Tick every poll interval until `shutdown` is cancelled
    ///
    /// A tick in progress always finishes; the token is checked between ticks.
    pub async fn run(&self, mut ctx: TickContext, shutdown: CancellationToken) -> TickContext {
        tracing::info!(kind = %self.kind, interval = ?self.poll_interval, "🔄 Engine loop starting");

        let mut ticker = interval_at(Instant::now(), self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Utc::now().timestamp();
            match self.tick(ctx, now).await {
                Ok((next, _)) => ctx = next,
                Err(e) => {
                    tracing::error!(kind = %self.kind, error = %e, "Tick failed, retrying next interval");
                }
            }
        }

        tracing::info!(kind = %self.kind, "Engine loop stopped");
        ctx
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let pending = self.store.values(Partition::Pending).await?;
        Ok(EngineStatus {
            triggered: pending.iter().filter(|i| i.is_triggered()).count(),
            pending: pending.len(),
            failed: self.store.values(Partition::Failed).await?.len(),
            prices: self.index.count().await?,
            latest_price_timestamp: self.index.latest_timestamp().await?,
        })
    }
}
