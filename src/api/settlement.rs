use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ActionExecutor, Redeemer};
use crate::models::{ExecutionOutcome, Instrument, InstrumentKind, InstrumentTerms};
use crate::{Error, Result};

/// Client for the settlement service that signs and submits transactions
///
/// The service owns keys, gas pricing and ABI encoding; this side only says
/// which instrument to act on and reads back the outcome.
#[derive(Clone)]
pub struct SettlementClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    id: &'a str,
    kind: InstrumentKind,
    trigger_round_id: u64,
    trigger_timestamp: Option<i64>,
    barrier_price: Decimal,
    terms: &'a InstrumentTerms,
}

#[derive(Debug, Serialize)]
struct RedeemRequest<'a> {
    option_address: &'a str,
    owner: &'a str,
}

#[derive(Debug, Deserialize)]
struct OutcomeResponse {
    outcome: ExecutionOutcome,
    #[serde(default)]
    tx_hash: Option<String>,
}

impl SettlementClient {
    /// `timeout` bounds a single HTTP exchange
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<OutcomeResponse> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::TransientBackend(format!(
                "settlement {} returned {}: {}",
                path, status, text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ActionExecutor for SettlementClient {
    async fn execute(&self, instrument: &Instrument) -> Result<ExecutionOutcome> {
        let request = ExecuteRequest {
            id: &instrument.id,
            kind: instrument.kind(),
            trigger_round_id: instrument.trigger_round_id,
            trigger_timestamp: instrument.trigger_timestamp,
            barrier_price: instrument.barrier_price,
            terms: &instrument.terms,
        };

        let response = self.post("execute", &request).await?;
        if let Some(tx_hash) = &response.tx_hash {
            tracing::debug!(id = %instrument.id, tx_hash = %tx_hash, "Settlement transaction");
        }
        Ok(response.outcome)
    }
}

#[async_trait]
impl Redeemer for SettlementClient {
    async fn redeem(&self, option_address: &str, owner: &str) -> Result<ExecutionOutcome> {
        let request = RedeemRequest {
            option_address,
            owner,
        };

        let response = self.post("redeem", &request).await?;
        if let Some(tx_hash) = &response.tx_hash {
            tracing::debug!(option = %option_address, owner = %owner, tx_hash = %tx_hash, "Redeem transaction");
        }
        Ok(response.outcome)
    }
}
