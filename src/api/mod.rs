//! Interfaces to the external collaborators (feed source, settlement backend)
//! and their HTTP adapters.

pub mod settlement;
pub mod subgraph;

use async_trait::async_trait;

use crate::models::{ExecutedOption, ExecutionOutcome, Instrument, InstrumentKind, PriceSample};
use crate::Result;

pub use settlement::SettlementClient;
pub use subgraph::{SubgraphClient, SubgraphFeed};

/// Oracle rounds newer than a timestamp
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Samples with `timestamp > since`, oldest first, at most `limit`
    async fn fetch_prices_since(&self, since: i64, limit: usize) -> Result<Vec<PriceSample>>;
}

/// Newly created instruments of one kind
#[async_trait]
pub trait InstrumentFeed: Send + Sync {
    fn kind(&self) -> InstrumentKind;

    /// Instruments created after `since`, oldest first, at most `page_size`
    async fn fetch_instruments_since(&self, since: i64, page_size: usize)
        -> Result<Vec<Instrument>>;
}

/// Executed-option events and the holders that still have to redeem
#[async_trait]
pub trait RedemptionFeed: Send + Sync {
    /// Execution events after `since`, oldest first, at most `limit`
    async fn fetch_executed_since(&self, since: i64, limit: usize) -> Result<Vec<ExecutedOption>>;

    /// Owners with an unredeemed balance of the option token
    async fn fetch_redeemers(&self, option_address: &str) -> Result<Vec<String>>;
}

/// Settlement backend that acts on a triggered instrument
///
/// Must be safe to call repeatedly for the same instrument and trigger round:
/// the engine delivers at least once.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, instrument: &Instrument) -> Result<ExecutionOutcome>;
}

/// Settlement backend that redeems an executed option for one holder
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn redeem(&self, option_address: &str, owner: &str) -> Result<ExecutionOutcome>;
}
