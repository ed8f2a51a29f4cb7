use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use super::{InstrumentFeed, PriceFeed, RedemptionFeed};
use crate::models::{
    Direction, ExecutedOption, Instrument, InstrumentKind, InstrumentTerms, Partition,
    PriceSample,
};
use crate::{Error, Result};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // Start with 2 seconds
const REDEEMER_PAGE_SIZE: usize = 100;
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

type SubgraphRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const PRICES_QUERY: &str = r#"
query prices($lastTS: BigInt, $first: Int) {
  kiOracles(first: $first, orderBy: timestamp, orderDirection: asc, where: { timestamp_gt: $lastTS }) {
    id
    timestamp
    price
  }
}"#;

const OPTIONS_QUERY: &str = r#"
query options($lastTS: BigInt, $first: Int) {
  kiOptions(first: $first, orderBy: blockTimeStamp, orderDirection: asc, where: { blockTimeStamp_gt: $lastTS, isPlus_not: false }) {
    id
    underlying
    collateral
    barrierPrice
    expiry
    isUp
    isPlus
    blockTimeStamp
  }
}"#;

const VAULTS_QUERY: &str = r#"
query vaults($lastTS: BigInt, $first: Int) {
  vaults(first: $first, orderBy: blockTimeStamp, orderDirection: asc, where: { blockTimeStamp_gt: $lastTS, debt_gt: 0, collateral_gt: 0 }) {
    id
    debt
    collateral
    liquidationPrice
    blockTimeStamp
  }
}"#;

const EXECUTED_QUERY: &str = r#"
query executed($lastTS: BigInt, $first: Int) {
  optionExecuteds(first: $first, orderBy: blockTimestamp, orderDirection: asc, where: { blockTimestamp_gt: $lastTS }) {
    id
    optionId
    optionAddress
    roundId
    blockTimestamp
  }
}"#;

const REDEEMERS_QUERY: &str = r#"
query redeemers($optionAddress: Bytes, $excluded: [Bytes!], $first: Int) {
  optionTokenBalances(first: $first, where: { tokenAddress: $optionAddress, redeemed: false, owner_not_in: $excluded }) {
    owner
  }
}"#;

/// Rate-limited GraphQL client with retry logic
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct SubgraphClient {
    client: Client,
    rate_limiter: Arc<SubgraphRateLimiter>,
    initial_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl SubgraphClient {
    pub fn new(requests_per_second: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            client,
            rate_limiter,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first retry delay (doubles on every attempt)
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Run a GraphQL query with retry and exponential backoff for transient failures
    pub async fn query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.query_once(endpoint, query, &variables).await {
                Ok(data) => {
                    if attempt > 1 {
                        tracing::info!(
                            "✓ Subgraph query to {} succeeded after {} attempts",
                            endpoint,
                            attempt
                        );
                    }
                    return Ok(data);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let backoff = self.initial_backoff * 2_u32.pow(attempt - 1);
                        tracing::warn!(
                            "Attempt {}/{} failed for {}: {}. Retrying in {:?}...",
                            attempt,
                            MAX_RETRIES,
                            endpoint,
                            e,
                            backoff
                        );
                        sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        // All retries exhausted
        Err(last_error.unwrap_or_else(|| {
            Error::TransientBackend("All subgraph retry attempts failed".to_string())
        }))
    }

    /// Internal method to query once (without retry logic)
    async fn query_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
        variables: &Value,
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientBackend(format!(
                "subgraph returned {}: {}",
                status, body
            )));
        }

        let body: GraphQlResponse<T> = response.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(Error::TransientBackend(format!(
                "subgraph errors: {}",
                messages.join("; ")
            )));
        }

        body.data
            .ok_or_else(|| Error::TransientBackend("subgraph response without data".to_string()))
    }
}

/// Subgraph-backed feed source for one bot
pub struct SubgraphFeed {
    client: SubgraphClient,
    price_url: String,
    instrument_url: String,
    kind: InstrumentKind,
    ignored_owners: Vec<String>,
}

impl SubgraphFeed {
    pub fn new(
        client: SubgraphClient,
        price_url: impl Into<String>,
        instrument_url: impl Into<String>,
        kind: InstrumentKind,
    ) -> Self {
        Self {
            client,
            price_url: price_url.into(),
            instrument_url: instrument_url.into(),
            kind,
            ignored_owners: Vec::new(),
        }
    }

    /// Holders never asked to redeem (zero address is always excluded)
    pub fn with_ignored_owners(mut self, owners: Vec<String>) -> Self {
        self.ignored_owners = owners;
        self
    }
}

// BigInt / BigDecimal fields arrive as JSON strings, occasionally as numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => self.text().parse().ok(),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        let text = self.text();
        match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        }
    }

    fn to_decimal(&self) -> Option<Decimal> {
        let text = self.text();
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

#[derive(Debug, Deserialize)]
struct PricesData {
    #[serde(rename = "kiOracles")]
    rounds: Vec<RawRound>,
}

#[derive(Debug, Deserialize)]
struct RawRound {
    id: Scalar,
    timestamp: Scalar,
    price: Scalar,
}

#[derive(Debug, Deserialize)]
struct OptionsData {
    #[serde(rename = "kiOptions")]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOption {
    underlying: String,
    collateral: String,
    barrier_price: Scalar,
    expiry: Scalar,
    is_up: bool,
    is_plus: bool,
    block_time_stamp: Scalar,
}

#[derive(Debug, Deserialize)]
struct VaultsData {
    vaults: Vec<RawVault>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVault {
    id: String,
    debt: Scalar,
    collateral: Scalar,
    liquidation_price: Scalar,
    block_time_stamp: Scalar,
}

#[derive(Debug, Deserialize)]
struct ExecutedData {
    #[serde(rename = "optionExecuteds")]
    executed: Vec<RawExecuted>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecuted {
    id: String,
    option_id: Scalar,
    option_address: String,
    round_id: Scalar,
    block_timestamp: Scalar,
}

#[derive(Debug, Deserialize)]
struct RedeemersData {
    #[serde(rename = "optionTokenBalances")]
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    owner: String,
}

impl RawRound {
    fn into_sample(self) -> Option<PriceSample> {
        Some(PriceSample {
            round_id: self.id.to_u64()?,
            price: self.price.to_decimal()?,
            timestamp: self.timestamp.to_i64()?,
        })
    }
}

impl RawOption {
    fn into_instrument(self) -> Option<Instrument> {
        let barrier_price = self.barrier_price.to_decimal()?;
        let expiry = self.expiry.to_i64()?;
        let id = format!(
            "{}:{}:{}:{}:{}:{}",
            self.underlying.to_lowercase(),
            self.collateral.to_lowercase(),
            barrier_price.normalize(),
            expiry,
            self.is_up,
            self.is_plus
        );

        Some(Instrument {
            id,
            barrier_price,
            direction: Direction::from_is_up(self.is_up),
            active_from: self.block_time_stamp.to_i64()?,
            active_until: Some(expiry),
            trigger_round_id: 0,
            trigger_timestamp: None,
            status: Partition::Pending,
            terms: InstrumentTerms::Option {
                underlying: self.underlying,
                collateral: self.collateral,
                is_plus: self.is_plus,
            },
        })
    }
}

impl RawVault {
    fn into_instrument(self) -> Option<Instrument> {
        Some(Instrument {
            barrier_price: self.liquidation_price.to_decimal()?,
            direction: Direction::Down,
            active_from: self.block_time_stamp.to_i64()?,
            active_until: None,
            trigger_round_id: 0,
            trigger_timestamp: None,
            status: Partition::Pending,
            terms: InstrumentTerms::Vault {
                debt: self.debt.to_decimal()?,
                collateral: self.collateral.to_decimal()?,
            },
            id: self.id,
        })
    }
}

impl RawExecuted {
    fn into_executed(self) -> Option<ExecutedOption> {
        Some(ExecutedOption {
            option_id: self.option_id.text(),
            round_id: self.round_id.to_u64()?,
            block_timestamp: self.block_timestamp.to_i64()?,
            option_address: self.option_address,
            id: self.id,
        })
    }
}

fn last_ts(since: i64) -> Value {
    Value::String(since.to_string())
}

#[async_trait]
impl PriceFeed for SubgraphFeed {
    async fn fetch_prices_since(&self, since: i64, limit: usize) -> Result<Vec<PriceSample>> {
        let data: PricesData = self
            .client
            .query(
                &self.price_url,
                PRICES_QUERY,
                json!({ "lastTS": last_ts(since), "first": limit }),
            )
            .await?;

        let mut samples = Vec::with_capacity(data.rounds.len());
        for raw in data.rounds {
            let description = format!("{:?}", raw);
            match raw.into_sample() {
                Some(sample) => samples.push(sample),
                None => tracing::warn!(round = %description, "Skipping malformed oracle round"),
            }
        }
        Ok(samples)
    }
}

#[async_trait]
impl InstrumentFeed for SubgraphFeed {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    async fn fetch_instruments_since(
        &self,
        since: i64,
        page_size: usize,
    ) -> Result<Vec<Instrument>> {
        let variables = json!({ "lastTS": last_ts(since), "first": page_size });

        let decoded: Vec<(String, Option<Instrument>)> = match self.kind {
            InstrumentKind::Option => {
                let data: OptionsData = self
                    .client
                    .query(&self.instrument_url, OPTIONS_QUERY, variables)
                    .await?;
                data.options
                    .into_iter()
                    .map(|raw| (format!("{:?}", raw), raw.into_instrument()))
                    .collect()
            }
            InstrumentKind::Vault => {
                let data: VaultsData = self
                    .client
                    .query(&self.instrument_url, VAULTS_QUERY, variables)
                    .await?;
                data.vaults
                    .into_iter()
                    .map(|raw| (format!("{:?}", raw), raw.into_instrument()))
                    .collect()
            }
        };

        let mut instruments = Vec::with_capacity(decoded.len());
        for (description, instrument) in decoded {
            match instrument {
                Some(instrument) => instruments.push(instrument),
                None => tracing::warn!(kind = %self.kind, record = %description, "Skipping malformed instrument"),
            }
        }
        Ok(instruments)
    }
}

#[async_trait]
impl RedemptionFeed for SubgraphFeed {
    async fn fetch_executed_since(&self, since: i64, limit: usize) -> Result<Vec<ExecutedOption>> {
        let data: ExecutedData = self
            .client
            .query(
                &self.instrument_url,
                EXECUTED_QUERY,
                json!({ "lastTS": last_ts(since), "first": limit }),
            )
            .await?;

        let mut executed = Vec::with_capacity(data.executed.len());
        for raw in data.executed {
            let description = format!("{:?}", raw);
            match raw.into_executed() {
                Some(event) => executed.push(event),
                None => tracing::warn!(record = %description, "Skipping malformed execution event"),
            }
        }
        Ok(executed)
    }

    async fn fetch_redeemers(&self, option_address: &str) -> Result<Vec<String>> {
        let mut excluded = vec![ZERO_ADDRESS.to_string()];
        excluded.extend(self.ignored_owners.iter().map(|o| o.to_lowercase()));

        let data: RedeemersData = self
            .client
            .query(
                &self.instrument_url,
                REDEEMERS_QUERY,
                json!({
                    "optionAddress": option_address,
                    "excluded": excluded,
                    "first": REDEEMER_PAGE_SIZE,
                }),
            )
            .await?;

        Ok(data.balances.into_iter().map(|b| b.owner).collect())
    }
}
