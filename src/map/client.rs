use super::handle::{LiveHandle, RedisMap};
use crate::config::MapConfig;
use crate::error::Result;
use crate::fields::FieldStore;
use crate::lifecycle::Lease;
use crate::registry::{KeyRegistry, MapKey};
use crate::store::{Backend, MemoryBackend, RedisBackend};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Opens map handles against one backend.
///
/// All handles of a client share its connection pool, including their renewal
/// tasks. Keep `pool.max_total` above the number of live handles or renewals
/// can be starved.
pub struct MapClient {
    /// Store shared by every handle and renewal task of this client.
    backend: Arc<dyn Backend>,
    /// Mints and validates backing hash keys.
    registry: Arc<KeyRegistry>,
    config: MapConfig,
    /// Live handle count, decremented as handles drop.
    live: Arc<AtomicUsize>,
}

impl MapClient {
    /// Connects to the Redis server named in `config.redis_url`.
    pub async fn connect(config: MapConfig) -> Result<Self> {
        config.validate()?;
        let backend = RedisBackend::connect(&config).await?;
        Self::with_backend(Arc::new(backend), config)
    }

    /// Runs against a private in-process store.
    pub fn in_memory(config: MapConfig) -> Result<Self> {
        config.validate()?;
        let backend = MemoryBackend::new(&config.pool);
        Self::with_backend(Arc::new(backend), config)
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: MapConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(KeyRegistry::new(backend.clone(), &config)?);

        tracing::info!("Map client ready on {}", backend.describe());

        Ok(Self {
            backend,
            registry,
            config,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Number of handles opened by this client that are still alive.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Opens a handle on a freshly minted, unused key.
    pub async fn create(&self) -> Result<RedisMap> {
        let key = self.registry.mint().await?;
        self.open(key).await
    }

    /// Opens a handle on `redis-map:<id>`, creating the hash if it is absent.
    pub async fn attach_by_id(&self, id: i64) -> Result<RedisMap> {
        let key = self.registry.validate_existing_id(id).await?;
        self.open(key).await
    }

    /// Opens a handle on a textual key such as `"redis-map:42"`.
    pub async fn attach_by_key(&self, key: &str) -> Result<RedisMap> {
        let key = self.registry.validate_key(key).await?;
        self.open(key).await
    }

    async fn open(&self, key: MapKey) -> Result<RedisMap> {
        let fields = FieldStore::new(self.backend.clone(), &key, self.config.ttl);
        fields.initialize().await?;

        let lease = Lease::start(
            self.backend.clone(),
            key.to_string(),
            self.config.ttl,
            self.config.renewal_period,
        );

        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        if live as u64 >= u64::from(self.config.pool.max_total) {
            tracing::warn!(
                "{} live handles with a pool of {}; renewals may be starved",
                live,
                self.config.pool.max_total
            );
        }

        tracing::info!("Opened handle on {}", key);

        Ok(RedisMap::new(
            key,
            fields,
            self.backend.clone(),
            lease,
            self.config.ttl,
            self.config.scan_batch_size,
            LiveHandle::new(self.live.clone()),
        ))
    }
}
