//! Active-record style wrapper around one remote record.

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::context::ModelContext;
use super::definition::ModelDefinition;
use super::registry::ModelEvent;
use crate::error::{Error, Result};
use crate::service_layer::{EntityKey, Record};

/// Eager-loaded relation payload.
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<Box<SapB1Model>>),
    Many(Vec<SapB1Model>),
}

/// Property bag keyed by remote (PascalCase) field names, with dirty tracking
/// against the last state known to match the remote.
#[derive(Debug, Clone)]
pub struct SapB1Model {
    definition: Arc<ModelDefinition>,
    attributes: Record,
    original: Record,
    changes: Record,
    exists: bool,
    relations: HashMap<String, RelationValue>,
}

impl SapB1Model {
    /// A new, not yet persisted instance.
    pub fn new(definition: Arc<ModelDefinition>) -> Self {
        Self {
            definition,
            attributes: Record::new(),
            original: Record::new(),
            changes: Record::new(),
            exists: false,
            relations: HashMap::new(),
        }
    }

    /// An instance hydrated from a remote payload.
    pub fn from_remote(definition: Arc<ModelDefinition>, record: Record) -> Self {
        Self {
            definition,
            original: record.clone(),
            attributes: record,
            changes: Record::new(),
            exists: true,
            relations: HashMap::new(),
        }
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    pub fn entity(&self) -> &str {
        &self.definition.entity
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.attributes
            .get(&self.definition.primary_key)
            .and_then(EntityKey::from_json)
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.attributes.get(field).filter(|value| !value.is_null())
    }

    /// Typed read; `Ok(None)` when the field is absent or null.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        match self.get(field) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// SAP `BoYesNoEnum` read: `tYES` / `tNO`.
    pub fn get_flag(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            JsonValue::String(s) if s == "tYES" => Some(true),
            JsonValue::String(s) if s == "tNO" => Some(false),
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> &mut Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    pub fn fill(&mut self, record: Record) -> &mut Self {
        for (field, value) in record {
            self.attributes.insert(field, value);
        }
        self
    }

    pub fn attributes(&self) -> &Record {
        &self.attributes
    }

    /// Value as last loaded from or written to the remote.
    pub fn original(&self, field: &str) -> Option<&JsonValue> {
        self.original.get(field)
    }

    /// Fields whose current value differs from the original.
    pub fn dirty(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(field, value)| self.original.get(field.as_str()) != Some(*value))
            .map(|(field, _)| field.as_str())
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    pub fn is_dirty_field(&self, field: &str) -> bool {
        self.attributes.get(field) != self.original.get(field)
    }

    /// Whether the last save changed `field`, or anything when `None`.
    pub fn was_changed(&self, field: Option<&str>) -> bool {
        match field {
            Some(field) => self.changes.contains_key(field),
            None => !self.changes.is_empty(),
        }
    }

    /// Full payload for inserts.
    pub fn to_payload(&self) -> Record {
        self.attributes.clone()
    }

    /// Minimal PATCH payload.
    pub fn dirty_payload(&self) -> Record {
        self.attributes
            .iter()
            .filter(|(field, value)| self.original.get(field.as_str()) != Some(*value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), value);
    }

    fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    fn require_key(&self) -> Result<EntityKey> {
        self.key().ok_or_else(|| Error::ModelNotFound {
            entity: self.entity().to_string(),
            key: format!("<missing {}>", self.definition.primary_key),
        })
    }

    fn fire_halting(&self, ctx: &ModelContext, event: ModelEvent) -> Result<()> {
        if ctx.registry().fire(event, self) {
            Ok(())
        } else {
            Err(Error::OperationAborted {
                entity: self.entity().to_string(),
                event: event.to_string(),
            })
        }
    }

    /// Insert or update depending on [`Self::exists`]. An existing model with
    /// nothing dirty skips the remote call and still reports success.
    #[instrument(skip(self, ctx), fields(entity = %self.definition.entity, exists = self.exists))]
    pub async fn save(&mut self, ctx: &ModelContext) -> Result<bool> {
        self.fire_halting(ctx, ModelEvent::Saving)?;

        if self.exists {
            if self.is_dirty() {
                self.perform_update(ctx).await?;
            } else {
                debug!("nothing dirty; skipping update");
                self.changes.clear();
            }
        } else {
            self.perform_insert(ctx).await?;
        }

        self.sync_original();
        ctx.registry().fire(ModelEvent::Saved, self);
        Ok(true)
    }

    async fn perform_insert(&mut self, ctx: &ModelContext) -> Result<()> {
        self.fire_halting(ctx, ModelEvent::Creating)?;

        let created = ctx
            .service()
            .create(self.entity(), &self.to_payload())
            .await?;
        // The remote fills server-side fields such as DocEntry.
        self.fill(created);
        self.exists = true;
        self.changes = self.attributes.clone();
        ctx.cache().forget_entity(self.entity());

        ctx.registry().fire(ModelEvent::Created, self);
        Ok(())
    }

    async fn perform_update(&mut self, ctx: &ModelContext) -> Result<()> {
        self.fire_halting(ctx, ModelEvent::Updating)?;

        let key = self.require_key()?;
        let payload = self.dirty_payload();
        ctx.service().update(self.entity(), &key, &payload).await?;
        self.changes = payload;
        ctx.cache().forget_entity(self.entity());

        ctx.registry().fire(ModelEvent::Updated, self);
        Ok(())
    }

    /// Delete the remote record. Returns `false` for never-persisted models.
    #[instrument(skip(self, ctx), fields(entity = %self.definition.entity))]
    pub async fn delete(&mut self, ctx: &ModelContext) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        let key = self.require_key()?;
        self.fire_halting(ctx, ModelEvent::Deleting)?;

        ctx.service().delete(self.entity(), &key).await?;
        self.exists = false;
        ctx.cache().forget_entity(self.entity());

        ctx.registry().fire(ModelEvent::Deleted, self);
        Ok(true)
    }

    /// Reload attributes from the remote, discarding local changes.
    pub async fn refresh(&mut self, ctx: &ModelContext) -> Result<()> {
        let key = self.require_key()?;
        let record = ctx
            .service()
            .find(self.entity(), &key)
            .await?
            .ok_or_else(|| Error::ModelNotFound {
                entity: self.entity().to_string(),
                key: key.to_string(),
            })?;

        self.attributes = record;
        self.sync_original();
        self.changes.clear();
        ctx.registry().fire(ModelEvent::Retrieved, self);
        Ok(())
    }

    /// Invoke a bound action such as `Close` or `Cancel`.
    pub async fn perform_action(
        &self,
        ctx: &ModelContext,
        action: &str,
    ) -> Result<Option<JsonValue>> {
        let key = self.require_key()?;
        let response = ctx.service().action(self.entity(), &key, action).await?;
        ctx.cache().forget_entity(self.entity());
        Ok(response)
    }
}
