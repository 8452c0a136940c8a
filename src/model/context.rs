use std::sync::Arc;

use super::definition::ModelDefinition;
use super::instance::SapB1Model;
use super::registry::ModelRegistry;
use crate::cache::CacheManager;
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::service_layer::{EntityKey, ServiceLayer};

/// Everything a model operation needs: the remote, the cache and the
/// registry of definitions and listeners.
#[derive(Clone)]
pub struct ModelContext {
    service: Arc<dyn ServiceLayer>,
    cache: CacheManager,
    registry: Arc<ModelRegistry>,
}

impl ModelContext {
    pub fn new(
        service: Arc<dyn ServiceLayer>,
        cache: CacheManager,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            service,
            cache,
            registry,
        }
    }

    pub fn service(&self) -> &Arc<dyn ServiceLayer> {
        &self.service
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn definition(&self, entity: &str) -> Result<Arc<ModelDefinition>> {
        self.registry
            .definition(entity)
            .ok_or_else(|| Error::ModelNotRegistered {
                entity: entity.to_string(),
            })
    }

    pub fn query(&self, entity: &str) -> Result<QueryBuilder> {
        Ok(QueryBuilder::new(self.clone(), self.definition(entity)?))
    }

    /// Blank, unsaved instance of `entity`.
    pub fn make(&self, entity: &str) -> Result<SapB1Model> {
        Ok(SapB1Model::new(self.definition(entity)?))
    }

    pub async fn find(&self, entity: &str, key: impl Into<EntityKey>) -> Result<Option<SapB1Model>> {
        self.query(entity)?.find(key).await
    }
}
