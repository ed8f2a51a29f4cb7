use std::sync::Arc;

use super::StoreBackend;
use crate::models::{Instrument, Partition, SettledRecord};
use crate::{Error, Result};

/// Pending/failed instrument partitions for one engine instance
///
/// Each instrument is a single JSON record in `{namespace}:instruments`, keyed
/// by id, whose `status` field is its partition. Moving between partitions is
/// one overwrite, so an id can never sit in both. Executed instruments leave a
/// tombstone in `{namespace}:settled`.
#[derive(Clone)]
pub struct InstrumentStore {
    backend: Arc<dyn StoreBackend>,
    records_key: String,
    settled_key: String,
}

impl InstrumentStore {
    pub fn new(backend: Arc<dyn StoreBackend>, namespace: &str) -> Self {
        Self {
            backend,
            records_key: format!("{}:instruments", namespace),
            settled_key: format!("{}:settled", namespace),
        }
    }

    /// Insert or overwrite `instrument` in `partition`
    pub async fn upsert(&self, partition: Partition, instrument: &Instrument) -> Result<()> {
        instrument.validate().map_err(Error::InvalidArgument)?;

        let mut record = instrument.clone();
        record.status = partition;
        let json = serde_json::to_string(&record)?;

        self.backend
            .hset(&self.records_key, &record.id, &json)
            .await?;

        tracing::debug!(id = %record.id, partition = %partition, "Stored instrument");
        Ok(())
    }

    /// Remove `id` from `partition`. No-op (false) when absent or in the other partition.
    pub async fn remove(&self, partition: Partition, id: &str) -> Result<bool> {
        match self.get(id).await? {
            Some(existing) if existing.status == partition => {
                self.backend.hdel(&self.records_key, id).await
            }
            _ => Ok(false),
        }
    }

    pub async fn contains(&self, partition: Partition, id: &str) -> Result<bool> {
        Ok(matches!(self.get(id).await?, Some(existing) if existing.status == partition))
    }

    /// All instruments currently in `partition`
    pub async fn values(&self, partition: Partition) -> Result<Vec<Instrument>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|instrument| instrument.status == partition)
            .collect())
    }

    /// Lookup regardless of partition
    pub async fn get(&self, id: &str) -> Result<Option<Instrument>> {
        match self.backend.hget(&self.records_key, id).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<Instrument>> {
        let raw = self.backend.hvals(&self.records_key).await?;

        let mut instruments = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<Instrument>(&json) {
                Ok(instrument) => instruments.push(instrument),
                Err(e) => {
                    tracing::warn!(key = %self.records_key, error = %e, raw = %json, "Skipping undecodable instrument record");
                }
            }
        }
        Ok(instruments)
    }

    /// Terminal removal after a confirmed execution
    ///
    /// The tombstone is written before the record is dropped so a crash in
    /// between never lets the feed re-list the instrument.
    pub async fn settle(&self, instrument: &Instrument) -> Result<()> {
        let tombstone = serde_json::to_string(&SettledRecord::from(instrument))?;
        self.backend
            .hset(&self.settled_key, &instrument.id, &tombstone)
            .await?;

        let from_pending = self.remove(Partition::Pending, &instrument.id).await?;
        if self.contains(Partition::Failed, &instrument.id).await? {
            self.remove(Partition::Failed, &instrument.id).await?;
            tracing::debug!(id = %instrument.id, "Cleared stale retry entry");
        } else if !from_pending {
            tracing::debug!(id = %instrument.id, "Settled instrument was no longer stored");
        }
        Ok(())
    }

    pub async fn is_settled(&self, id: &str) -> Result<bool> {
        Ok(self.backend.hget(&self.settled_key, id).await?.is_some())
    }

    async fn settled(&self) -> Result<Vec<SettledRecord>> {
        let raw = self.backend.hvals(&self.settled_key).await?;

        let mut records = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<SettledRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(key = %self.settled_key, error = %e, raw = %json, "Skipping undecodable settled record");
                }
            }
        }
        Ok(records)
    }

    /// Latest trigger time among executed instruments (restores the execution cursor)
    pub async fn settled_high_water(&self) -> Result<Option<i64>> {
        Ok(self
            .settled()
            .await?
            .iter()
            .filter_map(|record| record.trigger_timestamp)
            .max())
    }

    /// Latest creation time among known instruments (restores the listing cursor)
    pub async fn listing_high_water(&self) -> Result<Option<i64>> {
        let stored = self.all().await?.into_iter().map(|i| i.active_from);
        let settled = self.settled().await?.into_iter().map(|r| r.active_from);
        Ok(stored.chain(settled).max())
    }
}
