use crate::models::{Instrument, Partition, PriceSample};
use crate::persistence::{InstrumentStore, PriceIndex};
use crate::Result;

/// First sample in `window` at or after the instrument's creation that crosses its barrier
///
/// `window` must be ordered by (timestamp, round_id), as returned by
/// [`PriceIndex::range_by_score`], so the result is stable across scans.
pub fn find_crossing<'a>(instrument: &Instrument, window: &'a [PriceSample]) -> Option<&'a PriceSample> {
    window.iter().find(|sample| {
        sample.timestamp >= instrument.active_from
            && instrument
                .direction
                .is_crossed(&sample.price, &instrument.barrier_price)
    })
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Triggered PENDING instruments, newly matched or carried over
    pub candidates: Vec<Instrument>,
    /// Instruments matched during this scan
    pub matched: usize,
}

/// Decides which pending instruments crossed their barrier
pub struct TriggerMatcher {
    index: PriceIndex,
    store: InstrumentStore,
}

impl TriggerMatcher {
    pub fn new(index: PriceIndex, store: InstrumentStore) -> Self {
        Self { index, store }
    }

    /// Match every PENDING instrument against prices in `[window_start, now]`
    ///
    /// A new trigger is persisted before the instrument is handed back, so a
    /// crash before execution keeps it as an implicit candidate.
    pub async fn scan(&self, window_start: i64, now: i64) -> Result<ScanResult> {
        let pending = self.store.values(Partition::Pending).await?;
        let mut result = ScanResult::default();

        let (triggered, untriggered): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(Instrument::is_triggered);
        result.candidates.extend(triggered);

        let open: Vec<Instrument> = untriggered
            .into_iter()
            .filter(|inst| inst.terms.is_matchable() && !inst.is_expired(now))
            .collect();
        if open.is_empty() {
            return Ok(result);
        }

        let window = self.index.range_by_score(window_start, now).await?;
        tracing::debug!(
            open = open.len(),
            samples = window.len(),
            window_start,
            now,
            "Scanning price window"
        );

        for mut instrument in open {
            let Some(sample) = find_crossing(&instrument, &window) else {
                continue;
            };

            instrument.trigger(sample);
            self.store.upsert(Partition::Pending, &instrument).await?;

            tracing::info!(
                id = %instrument.id,
                round_id = sample.round_id,
                price = %sample.price,
                barrier = %instrument.barrier_price,
                "🎯 Barrier crossed"
            );
            result.matched += 1;
            result.candidates.push(instrument);
        }

        Ok(result)
    }
}
