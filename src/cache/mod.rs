//! # Query cache
//!
//! Read-through caching for remote queries. [`CacheResolver`] decides whether a
//! read is cached; [`CacheManager`] derives the key and memoises the fetch in a
//! [`CacheStore`].
//!
//! Keys have the shape `{prefix}:{entity}:...` so that every cached read for an
//! entity can be dropped with one prefix removal after a write.

pub mod resolver;
pub mod store;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use resolver::{CacheOverride, CachePolicy, CacheResolver};
pub use store::{CacheStore, LruCacheStore};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::service_layer::{EntityKey, ODataQuery};

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    resolver: CacheResolver,
    prefix: String,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_store(config, Arc::new(LruCacheStore::new(config.max_entries)))
    }

    pub fn with_store(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            resolver: CacheResolver::from_config(config),
            prefix: config.prefix.clone(),
        }
    }

    pub fn resolver(&self) -> &CacheResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Key for a collection read or count.
    pub fn query_key(
        &self,
        entity: &str,
        kind: &str,
        query: &ODataQuery,
        relations: &[String],
    ) -> Result<String> {
        let material = serde_json::to_vec(&(query, relations))?;
        let digest = hex::encode(Sha256::digest(&material));
        Ok(format!("{}:{}:{}:{}", self.prefix, entity, kind, digest))
    }

    /// Key for a point lookup.
    pub fn find_key(&self, entity: &str, key: &EntityKey) -> String {
        format!("{}:{}:find:{}", self.prefix, entity, key)
    }

    /// Return the cached value for `key`, or run `fetch` and store its result.
    ///
    /// Errors from `fetch` are never cached.
    pub async fn remember<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.store.get(key) {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    counter!("sapb1_cache_hits_total", "entity" => entity.to_string()).increment(1);
                    debug!(entity, key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(entity, key, error = %err, "discarding unreadable cache entry");
                    self.store.forget(key);
                }
            }
        }

        counter!("sapb1_cache_misses_total", "entity" => entity.to_string()).increment(1);
        let value = fetch().await?;
        self.store.put(key, serde_json::to_value(&value)?, ttl);
        Ok(value)
    }

    /// Drop every cached read for `entity`.
    pub fn forget_entity(&self, entity: &str) -> usize {
        let removed = self
            .store
            .forget_prefix(&format!("{}:{}:", self.prefix, entity));
        if removed > 0 {
            debug!(entity, removed, "invalidated cached reads");
        }
        removed
    }

    pub fn flush(&self) {
        self.store.clear();
    }
}
