//! Holder redemption for executed options
//!
//! Once an option has been executed on-chain every holder of its token can
//! redeem. This worker follows `optionExecuted` events and asks the settlement
//! backend to redeem for each holder that still has a balance.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{RedemptionFeed, Redeemer};
use crate::execution::ingestor::page_cursor;
use crate::models::{ExecutedOption, ExecutionOutcome};
use crate::persistence::StoreBackend;
use crate::Result;

const EXECUTED_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeemReport {
    /// New execution events stored this tick
    pub recorded: usize,
    pub redeemed: usize,
    /// Executed options with no holders left, dropped from the store
    pub dropped: usize,
    pub failed: usize,
}

pub struct RedeemWorker {
    feed: Arc<dyn RedemptionFeed>,
    redeemer: Arc<dyn Redeemer>,
    backend: Arc<dyn StoreBackend>,
    executed_key: String,
}

impl RedeemWorker {
    pub fn new(
        feed: Arc<dyn RedemptionFeed>,
        redeemer: Arc<dyn Redeemer>,
        backend: Arc<dyn StoreBackend>,
        namespace: &str,
    ) -> Self {
        Self {
            feed,
            redeemer,
            backend,
            executed_key: format!("{}:executed", namespace),
        }
    }

    /// Executed options still waiting for holders, keyed by option address
    pub async fn executed(&self) -> Result<Vec<ExecutedOption>> {
        let raw = self.backend.hvals(&self.executed_key).await?;

        let mut executed = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<ExecutedOption>(&json) {
                Ok(event) => executed.push(event),
                Err(e) => {
                    tracing::warn!(key = %self.executed_key, error = %e, raw = %json, "Skipping undecodable execution event");
                }
            }
        }
        Ok(executed)
    }

    /// Newest stored execution event, used as the starting cursor
    pub async fn restore_cursor(&self) -> Result<i64> {
        Ok(self
            .executed()
            .await?
            .iter()
            .map(|e| e.block_timestamp)
            .max()
            .unwrap_or(0))
    }

    pub async fn tick(&self, since: i64) -> Result<(i64, RedeemReport)> {
        let mut report = RedeemReport::default();

        let events = self
            .feed
            .fetch_executed_since(since, EXECUTED_PAGE_SIZE)
            .await?;
        let timestamps: Vec<i64> = events.iter().map(|e| e.block_timestamp).collect();
        let cursor = page_cursor(since, &timestamps, EXECUTED_PAGE_SIZE);

        for event in events {
            let json = serde_json::to_string(&event)?;
            self.backend
                .hset(&self.executed_key, &event.option_address, &json)
                .await?;
            tracing::info!(
                option = %event.option_address,
                option_id = %event.option_id,
                round_id = event.round_id,
                "Option executed, tracking redemptions"
            );
            report.recorded += 1;
        }

        for event in self.executed().await? {
            let owners = self.feed.fetch_redeemers(&event.option_address).await?;
            if owners.is_empty() {
                self.backend
                    .hdel(&self.executed_key, &event.option_address)
                    .await?;
                tracing::info!(option = %event.option_address, "All holders redeemed");
                report.dropped += 1;
                continue;
            }

            for owner in owners {
                match self.redeemer.redeem(&event.option_address, &owner).await {
                    Ok(ExecutionOutcome::Succeeded) => {
                        tracing::info!(option = %event.option_address, owner = %owner, "Redeemed");
                        report.redeemed += 1;
                    }
                    Ok(outcome) => {
                        tracing::warn!(option = %event.option_address, owner = %owner, outcome = ?outcome, "Redeem not completed");
                        report.failed += 1;
                    }
                    Err(e) => {
                        tracing::error!(option = %event.option_address, owner = %owner, error = %e, "Redeem errored");
                        report.failed += 1;
                    }
                }
            }
        }

        Ok((cursor, report))
    }

    pub async fn run(&self, mut since: i64, interval: Duration, shutdown: CancellationToken) -> i64 {
        tracing::info!(interval = ?interval, "🔄 Redeem loop starting");

        let mut ticker = interval_at(Instant::now(), interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(since).await {
                Ok((next, report)) => {
                    since = next;
                    if report != RedeemReport::default() {
                        tracing::info!(
                            recorded = report.recorded,
                            redeemed = report.redeemed,
                            dropped = report.dropped,
                            failed = report.failed,
                            "Redeem tick complete"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "Redeem tick failed, retrying next interval"),
            }
        }

        tracing::info!("Redeem loop stopped");
        since
    }
}
