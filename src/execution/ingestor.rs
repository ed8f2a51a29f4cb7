use std::sync::Arc;

use crate::api::{InstrumentFeed, PriceFeed};
use crate::models::{Instrument, Partition, PriceSample};
use crate::persistence::{InstrumentStore, PriceIndex};
use crate::{Error, Result};

/// Cursor after a page fetched with a strict `timestamp > cursor` filter
///
/// A full page may end partway through its newest timestamp, so the cursor
/// stops just below it and that timestamp is fetched again on the next pass.
pub fn page_cursor(cursor: i64, timestamps: &[i64], limit: usize) -> i64 {
    let Some(&newest) = timestamps.iter().max() else {
        return cursor;
    };
    if timestamps.len() < limit {
        return newest.max(cursor);
    }

    match timestamps.iter().copied().filter(|&ts| ts < newest).max() {
        Some(below) => below.max(cursor),
        None => {
            // Nothing older to fall back to; more rows at `newest` are lost
            tracing::warn!(timestamp = newest, limit, "Full page shares one timestamp, advancing past it");
            newest.max(cursor)
        }
    }
}

/// Counters for one price ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestBatch {
    pub fetched: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Newest timestamp among accepted samples
    pub max_timestamp: Option<i64>,
}

/// Pulls oracle rounds from the feed into the price index
pub struct PriceIngestor {
    feed: Arc<dyn PriceFeed>,
    index: PriceIndex,
    page_size: usize,
}

impl PriceIngestor {
    pub fn new(feed: Arc<dyn PriceFeed>, index: PriceIndex, page_size: usize) -> Self {
        Self {
            feed,
            index,
            page_size,
        }
    }

    /// Samples strictly newer than `since`, one page
    pub async fn pull(&self, since: i64) -> Result<Vec<PriceSample>> {
        self.feed.fetch_prices_since(since, self.page_size).await
    }

    /// Append every sample; malformed ones are logged and skipped
    pub async fn append(&self, samples: &[PriceSample]) -> Result<IngestBatch> {
        let mut batch = IngestBatch {
            fetched: samples.len(),
            ..Default::default()
        };

        for sample in samples {
            match self.index.append(sample).await {
                Ok(true) => batch.appended += 1,
                Ok(false) => batch.duplicates += 1,
                Err(Error::InvalidArgument(reason)) => {
                    tracing::warn!(round_id = sample.round_id, reason = %reason, "Rejected price sample");
                    batch.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            batch.max_timestamp = batch.max_timestamp.max(Some(sample.timestamp));
        }

        Ok(batch)
    }

    /// Pull and append; returns the advanced cursor
    pub async fn ingest(&self, cursor: i64) -> Result<(i64, IngestBatch)> {
        let samples = self.pull(cursor).await?;
        if samples.is_empty() {
            return Ok((cursor, IngestBatch::default()));
        }

        let batch = self.append(&samples).await?;
        let timestamps: Vec<i64> = samples.iter().map(|s| s.timestamp).collect();
        let next = page_cursor(cursor, &timestamps, self.page_size);

        if batch.appended > 0 {
            tracing::debug!(
                appended = batch.appended,
                duplicates = batch.duplicates,
                cursor = next,
                "Indexed price samples"
            );
        }
        Ok((next, batch))
    }
}

/// Counters for one listing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingBatch {
    pub fetched: usize,
    pub listed: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// Pulls newly created instruments into the PENDING partition
pub struct InstrumentIngestor {
    feed: Arc<dyn InstrumentFeed>,
    store: InstrumentStore,
    first_page_size: usize,
    page_size: usize,
}

impl InstrumentIngestor {
    pub fn new(
        feed: Arc<dyn InstrumentFeed>,
        store: InstrumentStore,
        first_page_size: usize,
        page_size: usize,
    ) -> Self {
        Self {
            feed,
            store,
            first_page_size,
            page_size,
        }
    }

    async fn current_page_size(&self) -> Result<usize> {
        if self.store.values(Partition::Pending).await?.is_empty() {
            Ok(self.first_page_size)
        } else {
            Ok(self.page_size)
        }
    }

    /// Instruments created after `since`; a larger page while nothing is pending yet
    pub async fn pull(&self, since: i64) -> Result<Vec<Instrument>> {
        let page_size = self.current_page_size().await?;
        self.feed.fetch_instruments_since(since, page_size).await
    }

    pub async fn ingest(&self, cursor: i64) -> Result<(i64, ListingBatch)> {
        let page_size = self.current_page_size().await?;
        let instruments = self.feed.fetch_instruments_since(cursor, page_size).await?;
        let mut batch = ListingBatch {
            fetched: instruments.len(),
            ..Default::default()
        };
        let created: Vec<i64> = instruments.iter().map(|i| i.active_from).collect();
        let next = page_cursor(cursor, &created, page_size);

        for instrument in instruments {
            if instrument.kind() != self.feed.kind() {
                tracing::warn!(id = %instrument.id, kind = %instrument.kind(), "Feed returned instrument of another kind");
                batch.rejected += 1;
                continue;
            }

            // Never reset a recorded trigger or revive an executed instrument
            if self.store.get(&instrument.id).await?.is_some()
                || self.store.is_settled(&instrument.id).await?
            {
                batch.skipped += 1;
                continue;
            }

            match self.store.upsert(Partition::Pending, &instrument).await {
                Ok(()) => {
                    tracing::info!(
                        id = %instrument.id,
                        barrier = %instrument.barrier_price,
                        direction = ?instrument.direction,
                        "New instrument"
                    );
                    batch.listed += 1;
                }
                Err(Error::InvalidArgument(reason)) => {
                    tracing::warn!(id = %instrument.id, reason = %reason, "Rejected instrument");
                    batch.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((next, batch))
    }
}
