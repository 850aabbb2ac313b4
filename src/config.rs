//! Map Configuration
//!
//! Every tunable of the handle lifecycle, the scan protocol and the connection
//! pool lives in [`MapConfig`]. Defaults reproduce the constants the shared
//! hash format was designed around (30s lease, 5s pool wait, 100-field scan
//! batches). Values can be overridden from `REDIS_MAP_*` environment variables.

use crate::error::{MapError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Connection pool bounds shared by all handles of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Upper bound of connections managed by the pool.
    pub max_total: u32,
    /// Upper bound of connections kept idle.
    pub max_idle: u32,
    /// Idle connections maintained for renewal headroom (one per live handle).
    pub min_idle: u32,
    /// Ping a connection before handing it out.
    pub test_on_borrow: bool,
    /// Discard a connection on return if it saw an I/O failure.
    pub test_on_return: bool,
    /// How long `session()` blocks before failing with a pool timeout.
    pub max_wait: Duration,
    /// Idle time after which surplus connections are closed.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 100,
            max_idle: 100,
            min_idle: 10,
            test_on_borrow: true,
            test_on_return: true,
            max_wait: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub redis_url: String,
    /// Expiration horizon of a backing hash; reset on every renewal.
    pub ttl: Duration,
    /// Delay between renewals. Must leave `pool.max_wait` of margin below `ttl`.
    pub renewal_period: Duration,
    /// COUNT hint passed to every HSCAN call.
    pub scan_batch_size: usize,
    /// Expiration of the shared id counter, reset after each mint.
    pub counter_ttl: Duration,
    /// Largest id the registry will mint or accept.
    pub max_id: u64,
    pub pool: PoolConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        let ttl = Duration::from_secs(30);
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            ttl,
            renewal_period: ttl - pool.max_wait,
            scan_batch_size: 100,
            counter_ttl: Duration::from_secs(5 * 60),
            max_id: i32::MAX as u64,
            pool,
        }
    }
}

impl MapConfig {
    /// Builds a configuration from defaults overridden by `REDIS_MAP_*` variables.
    ///
    /// When only the TTL or the pool wait is overridden, the renewal period is
    /// re-derived as `ttl - max_wait` so the safety margin is preserved.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_MAP_URL") {
            config.redis_url = url;
        }
        if let Some(secs) = env_parse::<u64>("REDIS_MAP_TTL_SECS")? {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(count) = env_parse::<usize>("REDIS_MAP_SCAN_COUNT")? {
            config.scan_batch_size = count;
        }
        if let Some(secs) = env_parse::<u64>("REDIS_MAP_COUNTER_TTL_SECS")? {
            config.counter_ttl = Duration::from_secs(secs);
        }
        if let Some(max_id) = env_parse::<u64>("REDIS_MAP_MAX_ID")? {
            config.max_id = max_id;
        }
        if let Some(max_total) = env_parse::<u32>("REDIS_MAP_POOL_MAX_TOTAL")? {
            config.pool.max_total = max_total;
        }
        if let Some(max_idle) = env_parse::<u32>("REDIS_MAP_POOL_MAX_IDLE")? {
            config.pool.max_idle = max_idle;
        }
        if let Some(min_idle) = env_parse::<u32>("REDIS_MAP_POOL_MIN_IDLE")? {
            config.pool.min_idle = min_idle;
        }
        if let Some(flag) = env_parse::<bool>("REDIS_MAP_POOL_TEST_ON_BORROW")? {
            config.pool.test_on_borrow = flag;
        }
        if let Some(flag) = env_parse::<bool>("REDIS_MAP_POOL_TEST_ON_RETURN")? {
            config.pool.test_on_return = flag;
        }
        if let Some(secs) = env_parse::<u64>("REDIS_MAP_POOL_MAX_WAIT_SECS")? {
            config.pool.max_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("REDIS_MAP_POOL_IDLE_SECS")? {
            config.pool.idle_timeout = Duration::from_secs(secs);
        }

        config.renewal_period = match env_parse::<u64>("REDIS_MAP_RENEWAL_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => config.ttl.saturating_sub(config.pool.max_wait),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every client relies on.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(MapError::Config("ttl must be positive".into()));
        }
        if self.renewal_period.is_zero() {
            return Err(MapError::Config("renewal period must be positive".into()));
        }
        // A renewal delayed by a full pool wait must still land before expiry.
        if self.renewal_period + self.pool.max_wait > self.ttl {
            return Err(MapError::Config(format!(
                "renewal period ({:?}) plus pool wait ({:?}) must not exceed ttl ({:?})",
                self.renewal_period, self.pool.max_wait, self.ttl
            )));
        }
        if self.scan_batch_size == 0 {
            return Err(MapError::Config("scan batch size must be positive".into()));
        }
        if self.max_id == 0 {
            return Err(MapError::Config("max id must be positive".into()));
        }
        if self.pool.max_total == 0 {
            return Err(MapError::Config("pool max_total must be positive".into()));
        }
        if self.pool.min_idle > self.pool.max_idle || self.pool.max_idle > self.pool.max_total {
            return Err(MapError::Config(format!(
                "pool bounds must satisfy min_idle ({}) <= max_idle ({}) <= max_total ({})",
                self.pool.min_idle, self.pool.max_idle, self.pool.max_total
            )));
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MapError::Config(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
