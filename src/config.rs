//! Process configuration
//!
//! Layered with the `config` crate: built-in defaults, an optional config file,
//! then `BOT_*` environment variables (e.g. `BOT_POLL_INTERVAL_MS=5000`).

use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::InstrumentKind;
use crate::{Error, Result};

/// Lowest accepted polling interval; startup is rejected below it
pub const MIN_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub redis_url: String,
    pub price_feed_url: String,
    pub options_feed_url: String,
    pub vaults_feed_url: String,
    pub settlement_url: String,
    /// Sorted-set key shared by both bots
    pub price_key: String,
    pub poll_interval_ms: u64,
    pub execution_timeout_ms: u64,
    /// Instrument page size when the store is empty
    pub first_page_size: usize,
    pub page_size: usize,
    pub price_page_size: usize,
    pub feed_requests_per_second: u32,
    #[serde(default)]
    pub redeem_ignored_owners: Vec<String>,
}

impl BotConfig {
    /// Load defaults, then `path` (if given), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default(
                "price_feed_url",
                "https://api.thegraph.com/subgraphs/name/ivanzrx/kioracle",
            )?
            .set_default(
                "options_feed_url",
                "https://api.thegraph.com/subgraphs/name/ivanzrx/option",
            )?
            .set_default(
                "vaults_feed_url",
                "https://api.thegraph.com/subgraphs/name/ivanzrx/vault",
            )?
            .set_default("settlement_url", "http://127.0.0.1:8080")?
            .set_default("price_key", "MARKET")?
            .set_default("poll_interval_ms", 1000)?
            .set_default("execution_timeout_ms", 60_000)?
            .set_default("first_page_size", 1000)?
            .set_default("page_size", 100)?
            .set_default("price_page_size", 100)?
            .set_default("feed_requests_per_second", 5)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: BotConfig = builder
            .add_source(
                Environment::with_prefix("BOT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("redeem_ignored_owners"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(Error::Config(format!(
                "poll interval too low: {}ms (minimum {}ms)",
                self.poll_interval_ms, MIN_POLL_INTERVAL_MS
            )));
        }
        if self.execution_timeout_ms == 0 {
            return Err(Error::Config("execution timeout must be positive".to_string()));
        }
        if self.first_page_size == 0 || self.page_size == 0 || self.price_page_size == 0 {
            return Err(Error::Config("page sizes must be positive".to_string()));
        }
        if self.feed_requests_per_second == 0 {
            return Err(Error::Config(
                "feed rate limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Subgraph endpoint listing instruments of `kind`
    pub fn instrument_feed_url(&self, kind: InstrumentKind) -> &str {
        match kind {
            InstrumentKind::Option => &self.options_feed_url,
            InstrumentKind::Vault => &self.vaults_feed_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BotConfig {
        BotConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            price_feed_url: "http://feed/prices".to_string(),
            options_feed_url: "http://feed/options".to_string(),
            vaults_feed_url: "http://feed/vaults".to_string(),
            settlement_url: "http://settle".to_string(),
            price_key: "MARKET".to_string(),
            poll_interval_ms: 1000,
            execution_timeout_ms: 30_000,
            first_page_size: 1000,
            page_size: 100,
            price_page_size: 100,
            feed_requests_per_second: 5,
            redeem_ignored_owners: Vec::new(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::load(None).unwrap();
        assert!(config.poll_interval_ms >= MIN_POLL_INTERVAL_MS);
        assert_eq!(config.first_page_size, 1000);
    }

    #[test]
    fn test_rejects_low_poll_interval() {
        let config = BotConfig {
            poll_interval_ms: 999,
            ..base()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll interval too low"));
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let config = BotConfig {
            page_size: 0,
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_feed_url_by_kind() {
        let config = base();
        assert_eq!(
            config.instrument_feed_url(InstrumentKind::Vault),
            "http://feed/vaults"
        );
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
