use async_trait::async_trait;
use barrierbot::api::{ActionExecutor, InstrumentFeed, PriceFeed};
use barrierbot::execution::{Engine, EngineSettings, TickContext};
use barrierbot::persistence::{InstrumentStore, MemoryBackend, PriceIndex};
use barrierbot::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Price feed whose samples can be pushed between ticks
#[derive(Default)]
struct ScriptedPrices {
    samples: Mutex<Vec<PriceSample>>,
}

impl ScriptedPrices {
    fn push(&self, round_id: u64, price: &str, timestamp: i64) {
        self.samples
            .lock()
            .unwrap()
            .push(PriceSample::new(round_id, dec(price), timestamp));
    }
}

#[async_trait]
impl PriceFeed for ScriptedPrices {
    async fn fetch_prices_since(&self, since: i64, limit: usize) -> Result<Vec<PriceSample>> {
        Ok(self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.timestamp > since)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct ScriptedListing {
    kind: InstrumentKind,
    instruments: Mutex<Vec<Instrument>>,
}

impl ScriptedListing {
    fn new(kind: InstrumentKind) -> Self {
        Self {
            kind,
            instruments: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, instrument: Instrument) {
        self.instruments.lock().unwrap().push(instrument);
    }
}

#[async_trait]
impl InstrumentFeed for ScriptedListing {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    async fn fetch_instruments_since(&self, since: i64, page_size: usize) -> Result<Vec<Instrument>> {
        Ok(self
            .instruments
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.active_from > since)
            .take(page_size)
            .cloned()
            .collect())
    }
}

/// Executor replaying queued outcomes per id; unscripted calls succeed
#[derive(Default)]
struct ScriptedExecutor {
    outcomes: Mutex<HashMap<String, Vec<ExecutionOutcome>>>,
    calls: Mutex<Vec<(String, u64)>>,
    succeeded: Mutex<HashMap<String, usize>>,
}

impl ScriptedExecutor {
    fn queue(&self, id: &str, outcomes: &[ExecutionOutcome]) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .extend_from_slice(outcomes);
    }

    fn calls_for(&self, id: &str) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(call_id, _)| call_id == id)
            .map(|(_, round)| *round)
            .collect()
    }

    fn successes(&self, id: &str) -> usize {
        self.succeeded.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, instrument: &Instrument) -> Result<ExecutionOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((instrument.id.clone(), instrument.trigger_round_id));
        let outcome = match self.outcomes.lock().unwrap().get_mut(&instrument.id) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => ExecutionOutcome::Succeeded,
        };
        if outcome == ExecutionOutcome::Succeeded {
            *self
                .succeeded
                .lock()
                .unwrap()
                .entry(instrument.id.clone())
                .or_default() += 1;
        }
        Ok(outcome)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn option(id: &str, barrier: &str, direction: Direction, active_from: i64) -> Instrument {
    Instrument {
        id: id.to_string(),
        barrier_price: dec(barrier),
        direction,
        active_from,
        active_until: None,
        trigger_round_id: 0,
        trigger_timestamp: None,
        status: Partition::Pending,
        terms: InstrumentTerms::Option {
            underlying: "0xunderlying".to_string(),
            collateral: "0xcollateral".to_string(),
            is_plus: true,
        },
    }
}

fn vault(id: &str, liquidation_price: &str, active_from: i64) -> Instrument {
    Instrument {
        id: id.to_string(),
        barrier_price: dec(liquidation_price),
        direction: Direction::Down,
        active_from,
        active_until: None,
        trigger_round_id: 0,
        trigger_timestamp: None,
        status: Partition::Pending,
        terms: InstrumentTerms::Vault {
            debt: dec("1000"),
            collateral: dec("2"),
        },
    }
}

struct Harness {
    engine: Engine,
    prices: Arc<ScriptedPrices>,
    listing: Arc<ScriptedListing>,
    executor: Arc<ScriptedExecutor>,
    store: InstrumentStore,
    index: PriceIndex,
}

impl Harness {
    fn new(kind: InstrumentKind) -> Self {
        Self::with_backend(kind, Arc::new(MemoryBackend::new()))
    }

    fn with_backend(kind: InstrumentKind, backend: Arc<MemoryBackend>) -> Self {
        Self::build(kind, backend, 100)
    }

    fn with_price_page(kind: InstrumentKind, price_page_size: usize) -> Self {
        Self::build(kind, Arc::new(MemoryBackend::new()), price_page_size)
    }

    fn build(kind: InstrumentKind, backend: Arc<MemoryBackend>, price_page_size: usize) -> Self {
        let prices = Arc::new(ScriptedPrices::default());
        let listing = Arc::new(ScriptedListing::new(kind));
        let executor = Arc::new(ScriptedExecutor::default());

        let engine = Engine::new(
            backend.clone(),
            "MARKET",
            prices.clone(),
            listing.clone(),
            executor.clone(),
            EngineSettings {
                poll_interval: Duration::from_secs(1),
                execution_timeout: Duration::from_secs(5),
                first_page_size: 1000,
                page_size: 100,
                price_page_size,
            },
        );

        Self {
            engine,
            prices,
            listing,
            executor,
            store: InstrumentStore::new(backend.clone(), kind.namespace()),
            index: PriceIndex::new(backend, "MARKET"),
        }
    }
}

const NOW: i64 = 1659100000;

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_up_barrier_is_matched_and_executed() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("opt-1", "1250", Direction::Up, 1658986060));
    h.prices.push(1, "1290", 1658986065);

    let (ctx, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.listed, 1);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.executed, 1);
    assert_eq!(h.executor.calls_for("opt-1"), vec![1]);
    assert_eq!(ctx.last_ingest_timestamp, 1658986065);
    assert_eq!(ctx.last_listing_timestamp, 1658986060);
    assert_eq!(ctx.last_execution_timestamp, 1658986065);
    assert!(h.store.get("opt-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_execution_is_retried_until_success() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("opt-1", "1250", Direction::Up, 1658986060));
    h.prices.push(1, "1290", 1658986065);
    h.executor.queue("opt-1", &[ExecutionOutcome::Failed]);

    // Tick 1: matched, execution fails, moved to FAILED
    let (ctx, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    assert_eq!(summary.failed, 1);
    assert_eq!(ctx.last_execution_timestamp, 0);
    assert!(h.store.contains(Partition::Failed, "opt-1").await.unwrap());
    assert!(!h.store.contains(Partition::Pending, "opt-1").await.unwrap());

    // Tick 2: no new prices, still worked through the retry set
    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW + 1).await);
    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.executed, 1);
    assert_eq!(ctx.last_execution_timestamp, 1658986065);
    assert!(h.store.values(Partition::Failed).await.unwrap().is_empty());
    assert_eq!(h.executor.calls_for("opt-1"), vec![1, 1]);

    // Tick 3: nothing left to do
    let (_, summary) = assert_ok!(h.engine.tick(ctx, NOW + 2).await);
    assert_eq!(summary.executed, 0);
    assert_eq!(h.executor.calls_for("opt-1").len(), 2);
}

#[tokio::test]
async fn test_expired_untriggered_is_never_a_candidate() {
    let h = Harness::new(InstrumentKind::Option);
    let mut inst = option("opt-1", "1250", Direction::Up, 1658986060);
    inst.active_until = Some(1658990000);
    h.listing.push(inst);
    h.prices.push(1, "1290", 1658986065);

    let (_, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);

    assert_eq!(summary.matched, 0);
    assert!(h.executor.calls_for("opt-1").is_empty());
    let stored = h.store.get("opt-1").await.unwrap().unwrap();
    assert_eq!(stored.trigger_round_id, 0);
}

#[tokio::test]
async fn test_same_timestamp_samples_resolve_by_round() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("up", "1250", Direction::Up, 1658999000));
    h.listing.push(option("down", "1100", Direction::Down, 1658999000));
    h.prices.push(11, "1300", 1659000000);
    h.prices.push(12, "1050", 1659000000);
    // Unreachable keeps both triggers visible in the store
    h.executor.queue("up", &[ExecutionOutcome::Unreachable]);
    h.executor.queue("down", &[ExecutionOutcome::Unreachable]);

    let (_, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);

    assert_eq!(summary.matched, 2);
    assert_eq!(summary.unreachable, 2);
    assert_eq!(h.store.get("up").await.unwrap().unwrap().trigger_round_id, 11);
    assert_eq!(h.store.get("down").await.unwrap().unwrap().trigger_round_id, 12);
}

#[tokio::test]
async fn test_crossing_past_a_full_price_page_is_found() {
    let h = Harness::with_price_page(InstrumentKind::Option, 2);
    h.listing.push(option("opt-1", "1250", Direction::Up, 50));
    h.prices.push(1, "1200", 100);
    h.prices.push(2, "1200", 200);
    // Same timestamp as round 2 but past the end of the first page
    h.prices.push(3, "1290", 200);

    let (ctx, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    assert_eq!(summary.matched, 0);
    assert_eq!(ctx.last_ingest_timestamp, 100);

    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW).await);
    assert_eq!(summary.matched, 1);
    assert_eq!(h.executor.calls_for("opt-1"), vec![3]);
    assert_eq!(ctx.last_ingest_timestamp, 200);
    assert_eq!(h.index.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_vault_liquidation() {
    let h = Harness::new(InstrumentKind::Vault);
    h.listing.push(vault("42", "900", 1000));
    h.prices.push(1, "950", 1100);

    let (ctx, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    assert_eq!(summary.matched, 0);

    h.prices.push(2, "880", 1200);
    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW + 1).await);
    assert_eq!(summary.executed, 1);
    assert_eq!(h.executor.calls_for("42"), vec![2]);
    assert_eq!(ctx.last_execution_timestamp, 1200);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_unreachable_keeps_trigger_and_cursor() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("opt-1", "1250", Direction::Up, 100));
    h.prices.push(1, "1290", 110);
    h.executor.queue(
        "opt-1",
        &[ExecutionOutcome::Unreachable, ExecutionOutcome::Unreachable],
    );

    let (ctx, _) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    h.prices.push(2, "1400", 120);
    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW + 1).await);

    // Implicit candidate on tick 2, still carrying its first trigger
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.unreachable, 1);
    assert_eq!(ctx.last_execution_timestamp, 0);
    assert_eq!(h.executor.calls_for("opt-1"), vec![1, 1]);
    assert!(h.store.contains(Partition::Pending, "opt-1").await.unwrap());

    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW + 2).await);
    assert_eq!(summary.executed, 1);
    assert_eq!(ctx.last_execution_timestamp, 110);
}

#[tokio::test]
async fn test_at_most_one_success_per_instrument() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("opt-1", "1250", Direction::Up, 100));
    h.prices.push(1, "1290", 110);

    let mut ctx = TickContext::default();
    for i in 0..5 {
        h.prices.push(10 + i as u64, "1300", 200 + i);
        ctx = assert_ok!(h.engine.tick(ctx, NOW + i).await).0;
    }

    assert_eq!(h.executor.successes("opt-1"), 1);
    assert!(h.store.is_settled("opt-1").await.unwrap());
}

#[tokio::test]
async fn test_cursors_are_monotonic() {
    let h = Harness::new(InstrumentKind::Option);
    h.listing.push(option("a", "1250", Direction::Up, 100));
    h.listing.push(option("b", "1000", Direction::Up, 150));
    h.prices.push(1, "1100", 160);
    h.prices.push(2, "1300", 170);

    let mut previous = TickContext::default();
    for i in 0..3 {
        let (ctx, _) = assert_ok!(h.engine.tick(previous, NOW + i).await);
        assert!(ctx.last_ingest_timestamp >= previous.last_ingest_timestamp);
        assert!(ctx.last_listing_timestamp >= previous.last_listing_timestamp);
        assert!(ctx.last_execution_timestamp >= previous.last_execution_timestamp);
        previous = ctx;
    }
    assert_eq!(previous.last_execution_timestamp, 170);
}

#[tokio::test]
async fn test_partitions_stay_exclusive() {
    let h = Harness::new(InstrumentKind::Option);
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        h.listing.push(option(id, "1250", Direction::Up, 100 + i as i64));
    }
    h.prices.push(1, "1290", 200);
    h.executor.queue("a", &[ExecutionOutcome::Failed, ExecutionOutcome::Failed]);
    h.executor.queue("b", &[ExecutionOutcome::Unreachable]);

    let mut ctx = TickContext::default();
    for i in 0..3 {
        ctx = assert_ok!(h.engine.tick(ctx, NOW + i).await).0;

        let pending = h.store.values(Partition::Pending).await.unwrap();
        let failed = h.store.values(Partition::Failed).await.unwrap();
        for inst in &pending {
            assert!(failed.iter().all(|f| f.id != inst.id));
        }
    }
}

#[tokio::test]
async fn test_replayed_feed_does_not_duplicate() {
    let h = Harness::new(InstrumentKind::Option);
    h.prices.push(1, "1290", 110);
    h.prices.push(2, "1300", 120);

    // A rewound cursor makes the feed replay both samples
    let (ctx, _) = assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    assert_ok!(h.engine.tick(TickContext::default(), NOW).await);

    assert_eq!(h.index.count().await.unwrap(), 2);
    assert_eq!(ctx.last_ingest_timestamp, 120);
}

#[tokio::test]
async fn test_restart_resumes_from_store() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let h = Harness::with_backend(InstrumentKind::Option, backend.clone());
        h.listing.push(option("opt-1", "1250", Direction::Up, 100));
        h.prices.push(1, "1290", 110);
        h.executor.queue("opt-1", &[ExecutionOutcome::Failed]);
        assert_ok!(h.engine.tick(TickContext::default(), NOW).await);
    }

    let h = Harness::with_backend(InstrumentKind::Option, backend);
    // Feed still lists the instrument; it must not re-enter PENDING untriggered
    h.listing.push(option("opt-1", "1250", Direction::Up, 100));
    let ctx = assert_ok!(h.engine.restore_context().await);
    assert_eq!(ctx.last_ingest_timestamp, 110);
    assert_eq!(ctx.last_listing_timestamp, 100);

    let (ctx, summary) = assert_ok!(h.engine.tick(ctx, NOW + 1).await);
    assert_eq!(summary.executed, 1);
    assert_eq!(ctx.last_execution_timestamp, 110);

    // Settled instruments are never listed again, even from a rewound cursor
    let (_, summary) = assert_ok!(h.engine.tick(TickContext::default(), NOW + 2).await);
    assert_eq!(summary.listed, 0);
    assert!(h.store.get("opt-1").await.unwrap().is_none());
    assert_eq!(h.index.count().await.unwrap(), 1);
}
