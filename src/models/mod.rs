use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price observation from the oracle feed
///
/// Immutable once appended to the price index. Ordered by `timestamp`,
/// ties broken by lowest `round_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceSample {
    pub round_id: u64,
    pub price: Decimal,
    pub timestamp: i64, // unix seconds
}

impl PriceSample {
    pub fn new(round_id: u64, price: Decimal, timestamp: i64) -> Self {
        Self {
            round_id,
            price,
            timestamp,
        }
    }
}

/// Which way the price has to move to cross the barrier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

type CrossingRule = fn(&Decimal, &Decimal) -> bool;

fn at_or_above(price: &Decimal, barrier: &Decimal) -> bool {
    price >= barrier
}

fn at_or_below(price: &Decimal, barrier: &Decimal) -> bool {
    price <= barrier
}

const CROSSING_RULES: [(Direction, CrossingRule); 2] = [
    (Direction::Up, at_or_above),
    (Direction::Down, at_or_below),
];

impl Direction {
    /// Whether `price` satisfies the barrier condition for this direction
    pub fn is_crossed(self, price: &Decimal, barrier: &Decimal) -> bool {
        CROSSING_RULES
            .iter()
            .find(|(direction, _)| *direction == self)
            .map(|(_, rule)| rule(price, barrier))
            .unwrap_or(false)
    }

    pub fn from_is_up(is_up: bool) -> Self {
        if is_up {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// Instrument store partition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Partition {
    /// Awaiting trigger or first execution
    Pending,
    /// Execution attempted and reported failed, awaiting retry
    Failed,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Pending => write!(f, "PENDING"),
            Partition::Failed => write!(f, "FAILED"),
        }
    }
}

/// Instrument family, one per bot process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    #[value(name = "options")]
    Option,
    #[value(name = "vaults")]
    Vault,
}

impl InstrumentKind {
    /// Store namespace used by this bot's instrument partitions
    pub fn namespace(self) -> &'static str {
        match self {
            InstrumentKind::Option => "options",
            InstrumentKind::Vault => "vaults",
        }
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Kind-specific payload forwarded to the action executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrumentTerms {
    Option {
        underlying: String,
        collateral: String,
        is_plus: bool,
    },
    Vault {
        debt: Decimal,
        collateral: Decimal,
    },
}

impl InstrumentTerms {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            InstrumentTerms::Option { .. } => InstrumentKind::Option,
            InstrumentTerms::Vault { .. } => InstrumentKind::Vault,
        }
    }

    /// Whether this side of the instrument owns an execution obligation
    ///
    /// Only the "plus" side of an option is executed; a vault needs an open
    /// position (debt or collateral) to be liquidated.
    pub fn is_matchable(&self) -> bool {
        match self {
            InstrumentTerms::Option { is_plus, .. } => *is_plus,
            InstrumentTerms::Vault { debt, collateral } => {
                *debt > Decimal::ZERO || *collateral > Decimal::ZERO
            }
        }
    }
}

/// A pending barrier obligation: an option contract or a collateral vault
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub id: String,
    pub barrier_price: Decimal,
    pub direction: Direction,
    pub active_from: i64,
    pub active_until: Option<i64>, // None = never expires
    pub trigger_round_id: u64,     // 0 = not yet triggered
    #[serde(default)]
    pub trigger_timestamp: Option<i64>,
    pub status: Partition,
    pub terms: InstrumentTerms,
}

impl Instrument {
    pub fn kind(&self) -> InstrumentKind {
        self.terms.kind()
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger_round_id != 0
    }

    /// Expired at `now` (inclusive expiry: active while `active_until >= now`)
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.active_until, Some(until) if until < now)
    }

    /// Record the crossing sample
    pub fn trigger(&mut self, sample: &PriceSample) {
        self.trigger_round_id = sample.round_id;
        self.trigger_timestamp = Some(sample.timestamp);
    }

    /// Check the record is well formed before it is persisted
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("instrument id is empty".to_string());
        }
        if self.barrier_price <= Decimal::ZERO {
            return Err(format!(
                "instrument {} has non-positive barrier {}",
                self.id, self.barrier_price
            ));
        }
        if self.active_from < 0 {
            return Err(format!(
                "instrument {} has negative creation time {}",
                self.id, self.active_from
            ));
        }
        if let Some(until) = self.active_until {
            if until < self.active_from {
                return Err(format!(
                    "instrument {} expires ({}) before it was created ({})",
                    self.id, until, self.active_from
                ));
            }
        }
        if self.is_triggered() && self.trigger_timestamp.is_none() {
            return Err(format!(
                "instrument {} has trigger round {} without a trigger time",
                self.id, self.trigger_round_id
            ));
        }
        Ok(())
    }
}

/// Three-valued result of an action executor call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    /// Backend precondition not met yet; benign "not yet"
    Unreachable,
}

/// Tombstone kept after an instrument was executed, so it never re-enters the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettledRecord {
    pub id: String,
    pub trigger_round_id: u64,
    pub trigger_timestamp: Option<i64>,
    pub active_from: i64,
}

impl From<&Instrument> for SettledRecord {
    fn from(instrument: &Instrument) -> Self {
        Self {
            id: instrument.id.clone(),
            trigger_round_id: instrument.trigger_round_id,
            trigger_timestamp: instrument.trigger_timestamp,
            active_from: instrument.active_from,
        }
    }
}

/// An option execution event reported by the feed, awaiting holder redemption
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutedOption {
    pub id: String,
    pub option_id: String,
    pub option_address: String,
    pub round_id: u64,
    pub block_timestamp: i64,
}
