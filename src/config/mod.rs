//! Configuration loading for the SAP B1 toolkit.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `SAPB1_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Application configuration derived from `SAPB1_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub service_layer: ServiceLayerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Connection settings for the SAP Business One Service Layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServiceLayerConfig {
    /// Base URL including the version segment, e.g. `https://host:50000/b1s/v1`
    #[serde(default = "default_service_layer_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_service_layer_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Retries for transient failures (network, 5xx, 429); 0 disables retrying
    #[serde(default = "default_service_layer_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    #[serde(default = "default_service_layer_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Self-signed certificates are common on on-premise Service Layer installs
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Read-through cache settings for model queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
}

/// Defaults applied to sync configs that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncSettings {
    #[serde(default = "default_sync_batch_size")]
    pub default_batch_size: u32,
    /// Page size for primary-key-only fetches during delete reconciliation
    #[serde(default = "default_sync_key_batch_size")]
    pub key_batch_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            service_layer: ServiceLayerConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for ServiceLayerConfig {
    fn default() -> Self {
        Self {
            base_url: default_service_layer_url(),
            company_db: None,
            username: None,
            password: None,
            timeout_seconds: default_service_layer_timeout_seconds(),
            max_retries: default_service_layer_max_retries(),
            retry_base_ms: default_service_layer_retry_base_ms(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl_seconds(),
            max_entries: default_cache_max_entries(),
            prefix: default_cache_prefix(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_batch_size: default_sync_batch_size(),
            key_batch_size: default_sync_key_batch_size(),
        }
    }
}

impl ServiceLayerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate URL and retry bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidServiceLayerUrl {
            value: self.base_url.clone(),
            source,
        })?;

        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidServiceLayerTimeout {
                value: self.timeout_seconds,
            });
        }

        if self.max_retries > 10 {
            return Err(ConfigError::InvalidServiceLayerRetries {
                value: self.max_retries,
            });
        }

        Ok(())
    }

    fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.company_db.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingCompanyDb);
        }
        if self.username.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingUsername);
        }
        if self.password.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingPassword);
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::InvalidCachePrefix);
        }
        Ok(())
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "SYNC_DEFAULT_BATCH_SIZE",
            });
        }
        if self.key_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "SYNC_KEY_BATCH_SIZE",
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Profiles where missing Service Layer credentials are tolerated.
    pub fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.service_layer.password.is_some() {
            config.service_layer.password = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        self.service_layer.validate()?;
        if !self.is_local_profile() {
            self.service_layer.require_credentials()?;
        }

        self.cache.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://sapb1.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_service_layer_url() -> String {
    "https://localhost:50000/b1s/v1".to_string()
}

fn default_service_layer_timeout_seconds() -> u64 {
    30
}

fn default_service_layer_max_retries() -> u32 {
    3
}

fn default_service_layer_retry_base_ms() -> u64 {
    200
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_seconds() -> u64 {
    300 // 5 minutes
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_prefix() -> String {
    "sapb1".to_string()
}

fn default_sync_batch_size() -> u32 {
    5000
}

fn default_sync_key_batch_size() -> u32 {
    20000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("database URL is missing; set SAPB1_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("invalid Service Layer URL '{value}': {source}")]
    InvalidServiceLayerUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("Service Layer timeout must be positive, got {value}")]
    InvalidServiceLayerTimeout { value: u64 },
    #[error("Service Layer retries must be at most 10, got {value}")]
    InvalidServiceLayerRetries { value: u32 },
    #[error("company database is missing; set SAPB1_COMPANY_DB")]
    MissingCompanyDb,
    #[error("Service Layer user is missing; set SAPB1_USERNAME")]
    MissingUsername,
    #[error("Service Layer password is missing; set SAPB1_PASSWORD")]
    MissingPassword,
    #[error("cache capacity must be positive")]
    InvalidCacheCapacity,
    #[error("cache key prefix cannot be empty")]
    InvalidCachePrefix,
    #[error("{field} must be greater than zero")]
    InvalidBatchSize { field: &'static str },
}

/// Loads configuration using layered `.env` files and `SAPB1_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("SAPB1_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let service_layer = ServiceLayerConfig {
            base_url: take_string(&mut layered, "SERVICE_LAYER_URL")
                .unwrap_or_else(default_service_layer_url),
            company_db: take_string(&mut layered, "COMPANY_DB"),
            username: take_string(&mut layered, "USERNAME"),
            password: take_string(&mut layered, "PASSWORD"),
            timeout_seconds: take_parsed(&mut layered, "SERVICE_LAYER_TIMEOUT_SECONDS")
                .unwrap_or_else(default_service_layer_timeout_seconds),
            max_retries: take_parsed(&mut layered, "SERVICE_LAYER_MAX_RETRIES")
                .unwrap_or_else(default_service_layer_max_retries),
            retry_base_ms: take_parsed(&mut layered, "SERVICE_LAYER_RETRY_BASE_MS")
                .unwrap_or_else(default_service_layer_retry_base_ms),
            accept_invalid_certs: take_parsed(&mut layered, "SERVICE_LAYER_ACCEPT_INVALID_CERTS")
                .unwrap_or(false),
        };

        let cache = CacheConfig {
            enabled: take_parsed(&mut layered, "CACHE_ENABLED")
                .unwrap_or_else(default_cache_enabled),
            ttl_seconds: take_parsed(&mut layered, "CACHE_TTL_SECONDS")
                .unwrap_or_else(default_cache_ttl_seconds),
            max_entries: take_parsed(&mut layered, "CACHE_MAX_ENTRIES")
                .unwrap_or_else(default_cache_max_entries),
            prefix: take_string(&mut layered, "CACHE_PREFIX").unwrap_or_else(default_cache_prefix),
        };

        let sync = SyncSettings {
            default_batch_size: take_parsed(&mut layered, "SYNC_DEFAULT_BATCH_SIZE")
                .unwrap_or_else(default_sync_batch_size),
            key_batch_size: take_parsed(&mut layered, "SYNC_KEY_BATCH_SIZE")
                .unwrap_or_else(default_sync_key_batch_size),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            service_layer,
            cache,
            sync,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("SAPB1_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("SAPB1_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_for_local_profile() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.default_batch_size, 5000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_production_profile_requires_credentials() {
        let mut config = AppConfig {
            profile: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCompanyDb)
        ));

        config.service_layer.company_db = Some("SBODEMOUS".to_string());
        config.service_layer.username = Some("manager".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPassword)
        ));

        config.service_layer.password = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = AppConfig::default();
        config.sync.default_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatchSize { .. })
        ));
    }

    #[test]
    fn test_invalid_service_layer_url_rejected() {
        let mut config = AppConfig::default();
        config.service_layer.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceLayerUrl { .. })
        ));
    }

    #[test]
    fn test_redacted_json_hides_password() {
        let mut config = AppConfig::default();
        config.service_layer.password = Some("hunter2".to_string());
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("[REDACTED]"));
    }
}
