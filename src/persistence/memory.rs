//! In-memory store backend
//!
//! Mirrors the Redis semantics the engine relies on (score-then-member
//! ordering, ZADD score updates, HSET overwrite). Non-persistent: data is lost
//! on restart.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::StoreBackend;
use crate::Result;

#[derive(Default)]
struct SortedSet {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

#[derive(Default)]
pub struct MemoryBackend {
    sorted_sets: RwLock<HashMap<String, SortedSet>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        let mut sets = self.sorted_sets.write().await;
        let set = sets.entry(key.to_string()).or_default();

        if set.scores.contains_key(member) {
            return Ok(false);
        }
        set.scores.insert(member.to_string(), score);
        set.ordered.insert((score, member.to_string()));
        Ok(true)
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        if min > max {
            return Ok(Vec::new());
        }
        let sets = self.sorted_sets.read().await;
        Ok(sets
            .get(key)
            .map(|set| {
                set.ordered
                    .range((min, String::new())..)
                    .take_while(|(score, _)| *score <= max)
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zmax_score(&self, key: &str) -> Result<Option<i64>> {
        let sets = self.sorted_sets.read().await;
        Ok(sets
            .get(key)
            .and_then(|set| set.ordered.iter().next_back().map(|(score, _)| *score)))
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let sets = self.sorted_sets.read().await;
        Ok(sets.get(key).map(|set| set.ordered.len()).unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sorted_sets.write().await.remove(key);
        self.hashes.write().await.remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let hashes = self.hashes.read().await;
        Ok(hashes.get(key).and_then(|hash| hash.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut hashes = self.hashes.write().await;
        Ok(hashes
            .get_mut(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hvals(&self, key: &str) -> Result<Vec<String>> {
        let hashes = self.hashes.read().await;
        Ok(hashes
            .get(key)
            .map(|hash| hash.values().cloned().collect())
            .unwrap_or_default())
    }
}
