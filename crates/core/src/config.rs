//! Configuration types

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ChainId, ConfigError, ConfigResult, DecayLaw};

/// Default config file name (without extension) looked up in the working directory
pub const CONFIG_FILE: &str = "nouns-pool";

/// Environment prefix; nested keys use `__`, e.g. `NOUNS_POOL_REFRESH__INTERVAL_MS`
pub const ENV_PREFIX: &str = "NOUNS_POOL";

/// Upstream endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub chain: ChainId,
    pub rpc_url: String,
    pub indexer_url: String,
    pub auction_house: Address,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            chain: ChainId::Ethereum,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            indexer_url: "http://127.0.0.1:42069/graphql".to_string(),
            auction_house: Address::ZERO,
        }
    }
}

/// Pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Refresh loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_ms: u64,
    pub feed_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Fractional jitter applied to each backoff delay, e.g. 0.2 = ±20%
    pub backoff_jitter: f64,
    /// Feed is reported disconnected after this many intervals without success
    pub staleness_multiplier: u32,
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        self.interval() * self.staleness_multiplier
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_ms: ChainId::Ethereum.block_time_ms(),
            feed_timeout_ms: 10_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_jitter: 0.2,
            staleness_multiplier: 2,
        }
    }
}

/// Arrival highlight timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub ttl_ms: u64,
}

impl HighlightConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self { ttl_ms: 5_000 }
    }
}

/// Pricing and purchase settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    pub price_decay_duration_secs: u64,
    pub decay_law: DecayLaw,
    /// Smallest price change worth reporting as a drop
    pub tick_granularity_wei: u128,
    /// Headroom added on top of the on-chain price for `buyNow`
    pub slippage_bps: u16,
    /// Largest tolerated gap between local and on-chain price
    pub max_price_deviation_bps: u16,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            price_decay_duration_secs: 86_400,
            decay_law: DecayLaw::Linear,
            tick_granularity_wei: 1_000_000_000_000, // 0.000001 ETH
            slippage_bps: 50,
            max_price_deviation_bps: 100,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub upstream: UpstreamConfig,
    pub pool: PoolConfig,
    pub refresh: RefreshConfig,
    pub highlight: HighlightConfig,
    pub auction: AuctionConfig,
}

impl ServiceConfig {
    /// Load from `nouns-pool.{toml,json,yaml}` (optional) overlaid with `NOUNS_POOL*` env vars
    pub fn from_env() -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Self::from_settings(settings)
    }

    /// Deserialize and validate. An unset refresh interval follows the chain's block time.
    pub fn from_settings(settings: config::Config) -> ConfigResult<Self> {
        let interval_set = settings.get::<u64>("refresh.interval_ms").is_ok();
        let mut config: ServiceConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        if !interval_set {
            config.refresh.interval_ms = config.upstream.chain.block_time_ms();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::Invalid("pool.capacity must be positive".into()));
        }
        if self.refresh.interval_ms == 0 {
            return Err(ConfigError::Invalid("refresh.interval_ms must be positive".into()));
        }
        if self.refresh.feed_timeout_ms == 0 {
            return Err(ConfigError::Invalid("refresh.feed_timeout_ms must be positive".into()));
        }
        if self.refresh.backoff_initial_ms == 0
            || self.refresh.backoff_max_ms < self.refresh.backoff_initial_ms
        {
            return Err(ConfigError::Invalid(
                "refresh backoff requires 0 < backoff_initial_ms <= backoff_max_ms".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.refresh.backoff_jitter) {
            return Err(ConfigError::Invalid("refresh.backoff_jitter must be in [0, 1)".into()));
        }
        if self.refresh.staleness_multiplier == 0 {
            return Err(ConfigError::Invalid("refresh.staleness_multiplier must be positive".into()));
        }
        if self.auction.price_decay_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "auction.price_decay_duration_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
