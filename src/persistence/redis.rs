use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::StoreBackend;
use crate::{Error, Result};

/// Redis store backend
///
/// Uses sorted sets with timestamps as scores for the price index and hashes
/// for instrument records.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Example
    /// ```ignore
    /// let backend = RedisBackend::connect("redis://127.0.0.1:6379").await?;
    /// ```
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                Error::TransientBackend("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    // ConnectionManager is a cheap handle; commands need `&mut`
    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        // NX: an indexed member keeps its first score
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(added > 0)
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let results: Vec<(String, f64)> = self
            .conn()
            .zrangebyscore_withscores(key, min as f64, max as f64)
            .await?;

        Ok(results
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zmax_score(&self, key: &str) -> Result<Option<i64>> {
        let top: Vec<(String, f64)> = self.conn().zrevrange_withscores(key, 0, 0).await?;
        Ok(top.first().map(|(_, score)| *score as i64))
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let count: usize = self.conn().zcard(key).await?;
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn().del::<_, ()>(key).await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.conn().hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn().hget(key, field).await?;
        Ok(value)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let removed: i64 = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hvals(&self, key: &str) -> Result<Vec<String>> {
        let values: Vec<String> = self.conn().hvals(key).await?;
        Ok(values)
    }
}
