//! Sync registry
//!
//! Resolves entity names to [`SyncConfig`]s: explicit registrations first,
//! then built-in presets.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use super::config::{DEFAULT_BATCH_SIZE, SyncConfig};
use super::presets::{PRESET_ENTITIES, preset};
use crate::db::SchemaInspector;
use crate::error::{Error, Result};

pub struct SyncRegistry {
    configs: RwLock<HashMap<String, SyncConfig>>,
    inspector: Arc<dyn SchemaInspector>,
    default_batch_size: u32,
}

impl SyncRegistry {
    pub fn new(inspector: Arc<dyn SchemaInspector>) -> Self {
        Self::with_batch_size(inspector, DEFAULT_BATCH_SIZE)
    }

    /// Presets resolved through this registry use `default_batch_size`.
    pub fn with_batch_size(inspector: Arc<dyn SchemaInspector>, default_batch_size: u32) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            inspector,
            default_batch_size,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SyncConfig>> {
        self.configs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SyncConfig>> {
        self.configs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registered config, else the built-in preset.
    pub fn get(&self, entity: &str) -> Result<SyncConfig> {
        self.find(entity)
            .ok_or_else(|| Error::entity_not_configured(entity))
    }

    pub fn find(&self, entity: &str) -> Option<SyncConfig> {
        if let Some(config) = self.read().get(entity) {
            return Some(config.clone());
        }
        preset(entity, self.default_batch_size)
    }

    /// Add or replace the config for `config.entity()`. Later registrations win.
    pub fn register(&self, config: SyncConfig) {
        info!(entity = %config.entity(), table = %config.table(), "registered sync config");
        self.write().insert(config.entity().to_string(), config);
    }

    pub fn is_registered(&self, entity: &str) -> bool {
        self.read().contains_key(entity)
    }

    /// Every known entity: registered and built-in, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut entities: BTreeSet<String> = self.read().keys().cloned().collect();
        entities.extend(PRESET_ENTITIES.iter().map(|e| e.to_string()));
        entities.into_iter().collect()
    }

    pub async fn table_exists(&self, entity: &str) -> Result<bool> {
        let config = self.get(entity)?;
        Ok(self.inspector.has_table(config.table()).await?)
    }

    async fn partition(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut with = Vec::new();
        let mut without = Vec::new();
        for entity in self.entities() {
            if self.table_exists(&entity).await? {
                with.push(entity);
            } else {
                without.push(entity);
            }
        }
        Ok((with, without))
    }

    pub async fn entities_with_tables(&self) -> Result<Vec<String>> {
        Ok(self.partition().await?.0)
    }

    pub async fn entities_without_tables(&self) -> Result<Vec<String>> {
        Ok(self.partition().await?.1)
    }

    /// Register every preset whose table exists, leaving explicit
    /// registrations alone. Returns the newly registered entities.
    pub async fn auto_register(&self) -> Result<Vec<String>> {
        let mut registered = Vec::new();
        for entity in PRESET_ENTITIES {
            if self.is_registered(entity) {
                continue;
            }
            let Some(config) = preset(entity, self.default_batch_size) else {
                continue;
            };
            if self.inspector.has_table(config.table()).await? {
                self.register(config);
                registered.push(entity.to_string());
            }
        }
        Ok(registered)
    }
}
