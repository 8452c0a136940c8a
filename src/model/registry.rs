//! Model definitions and lifecycle listeners.
//!
//! Replaces per-type static "booted" flags: listeners are attached once per
//! entity through [`ModelRegistry::ensure_booted`], and the registry itself is
//! passed around inside a [`super::ModelContext`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::SapB1Model;
use super::definition::ModelDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Retrieved,
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl ModelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelEvent::Retrieved => "retrieved",
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
        }
    }

    /// `*ing` events can veto the operation.
    pub fn is_halting(&self) -> bool {
        matches!(
            self,
            ModelEvent::Saving | ModelEvent::Creating | ModelEvent::Updating | ModelEvent::Deleting
        )
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener callback. Returning `false` from a halting event aborts.
pub type Listener = Arc<dyn Fn(&SapB1Model) -> bool + Send + Sync>;

#[derive(Default)]
pub struct ModelRegistry {
    definitions: RwLock<HashMap<String, Arc<ModelDefinition>>>,
    listeners: RwLock<HashMap<(String, ModelEvent), Vec<Listener>>>,
    booted: RwLock<HashSet<String>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a definition.
    pub fn register(&self, definition: ModelDefinition) -> Arc<ModelDefinition> {
        let definition = Arc::new(definition);
        write(&self.definitions).insert(definition.entity.clone(), definition.clone());
        definition
    }

    pub fn definition(&self, entity: &str) -> Option<Arc<ModelDefinition>> {
        read(&self.definitions).get(entity).cloned()
    }

    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = read(&self.definitions).keys().cloned().collect();
        entities.sort();
        entities
    }

    /// Run `boot` the first time it is called for `entity`. Returns whether it ran.
    pub fn ensure_booted<F>(&self, entity: &str, boot: F) -> bool
    where
        F: FnOnce(&Self),
    {
        if !write(&self.booted).insert(entity.to_string()) {
            return false;
        }
        boot(self);
        true
    }

    pub fn is_booted(&self, entity: &str) -> bool {
        read(&self.booted).contains(entity)
    }

    pub fn listen<F>(&self, entity: &str, event: ModelEvent, listener: F)
    where
        F: Fn(&SapB1Model) -> bool + Send + Sync + 'static,
    {
        write(&self.listeners)
            .entry((entity.to_string(), event))
            .or_default()
            .push(Arc::new(listener));
    }

    /// Dispatch `event` for `model`. Halting events stop at the first `false`
    /// and report it; other events always report `true`.
    pub fn fire(&self, event: ModelEvent, model: &SapB1Model) -> bool {
        let listeners: Vec<Listener> = read(&self.listeners)
            .get(&(model.entity().to_string(), event))
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            if !listener(model) && event.is_halting() {
                return false;
            }
        }
        true
    }
}
