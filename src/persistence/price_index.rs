use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use super::StoreBackend;
use crate::models::PriceSample;
use crate::{Error, Result};

/// Append-only, time-ordered index of oracle price samples
///
/// Stored in a sorted set: score = sample timestamp, member = `{round_id}-{price}`.
/// Re-appending the same sample is a no-op, so ingestion can safely replay.
#[derive(Clone)]
pub struct PriceIndex {
    backend: Arc<dyn StoreBackend>,
    key: String,
}

impl PriceIndex {
    pub fn new(backend: Arc<dyn StoreBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a sample. Returns false when the exact sample was already indexed.
    pub async fn append(&self, sample: &PriceSample) -> Result<bool> {
        if sample.timestamp <= 0 {
            return Err(Error::InvalidArgument(format!(
                "price sample round {} has non-positive timestamp {}",
                sample.round_id, sample.timestamp
            )));
        }
        if sample.price.is_sign_negative() {
            return Err(Error::InvalidArgument(format!(
                "price sample round {} has negative price {}",
                sample.round_id, sample.price
            )));
        }

        let member = encode_member(sample);
        self.backend.zadd(&self.key, &member, sample.timestamp).await
    }

    /// Samples with `min <= timestamp <= max`, ascending by timestamp then round id
    pub async fn range_by_score(&self, min: i64, max: i64) -> Result<Vec<PriceSample>> {
        let raw = self.backend.zrange_by_score(&self.key, min, max).await?;

        let mut samples = Vec::with_capacity(raw.len());
        for (member, score) in raw {
            match decode_member(&member, score) {
                Some(sample) => samples.push(sample),
                None => {
                    tracing::warn!(key = %self.key, member = %member, "Skipping undecodable price member");
                }
            }
        }

        // Backend orders same-score members lexicographically ("10-.." < "2-..")
        samples.sort_by_key(|s| (s.timestamp, s.round_id));
        Ok(samples)
    }

    /// Timestamp of the newest indexed sample
    pub async fn latest_timestamp(&self) -> Result<Option<i64>> {
        self.backend.zmax_score(&self.key).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.backend.zcard(&self.key).await
    }

    /// Drop the whole index (test/reset only)
    pub async fn clear(&self) -> Result<()> {
        tracing::warn!(key = %self.key, "Clearing price index");
        self.backend.delete(&self.key).await
    }
}

fn encode_member(sample: &PriceSample) -> String {
    format!("{}-{}", sample.round_id, sample.price.normalize())
}

fn decode_member(member: &str, score: i64) -> Option<PriceSample> {
    let (round, price) = member.split_once('-')?;
    Some(PriceSample {
        round_id: round.parse().ok()?,
        price: Decimal::from_str(price).ok()?,
        timestamp: score,
    })
}
