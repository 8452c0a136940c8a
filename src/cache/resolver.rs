//! Decides whether a read goes through the cache and for how long.

use std::time::Duration;

use crate::config::CacheConfig;

/// Per-model cache policy. `None` fields inherit the global configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: Option<bool>,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn inherit() -> Self {
        Self::default()
    }

    pub fn enabled(ttl: Duration) -> Self {
        Self {
            enabled: Some(true),
            ttl: Some(ttl),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ttl: None,
        }
    }
}

/// Per-query override set through `cache(ttl)` / `no_cache()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheOverride {
    #[default]
    Inherit,
    Ttl(Duration),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheResolver {
    enabled: bool,
    default_ttl: Duration,
}

impl CacheResolver {
    pub fn new(enabled: bool, default_ttl: Duration) -> Self {
        Self {
            enabled,
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.enabled, config.ttl())
    }

    /// TTL to cache with, or `None` to go straight to the remote.
    ///
    /// A globally disabled cache wins over everything. Otherwise the query
    /// override wins over the model policy, which wins over the global default.
    pub fn resolve(&self, model: &CachePolicy, query: CacheOverride) -> Option<Duration> {
        if !self.enabled {
            return None;
        }

        let ttl = match query {
            CacheOverride::Disabled => return None,
            CacheOverride::Ttl(ttl) => ttl,
            CacheOverride::Inherit => {
                if !model.enabled.unwrap_or(true) {
                    return None;
                }
                model.ttl.unwrap_or(self.default_ttl)
            }
        };

        (!ttl.is_zero()).then_some(ttl)
    }
}
