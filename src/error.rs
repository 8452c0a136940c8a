//! # Error Handling
//!
//! Unified error type for the toolkit. Configuration and validation failures
//! are raised before any remote call is made; remote failures during a sync
//! run are folded into a [`crate::sync::SyncResult`] by the sync service and
//! only surface here for direct model/query usage.

use thiserror::Error;

use crate::service_layer::ServiceLayerError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No registered config and no built-in preset for the entity.
    #[error("entity '{entity}' is not configured for local sync")]
    EntityNotConfigured { entity: String },

    /// The local mirror table for an entity has not been created.
    #[error("local table '{table}' for entity '{entity}' does not exist")]
    TableNotFound { entity: String, table: String },

    /// A caller-supplied field name failed identifier validation.
    #[error("invalid field name '{field}'")]
    InvalidFieldName { field: String },

    #[error("unsupported comparison operator '{operator}'")]
    InvalidOperator { operator: String },

    #[error("invalid sync configuration for '{entity}': {reason}")]
    InvalidSyncConfig { entity: String, reason: String },

    #[error("no {entity} record found for key {key}")]
    ModelNotFound { entity: String, key: String },

    #[error("no model definition registered for '{entity}'")]
    ModelNotRegistered { entity: String },

    #[error("'{relation}' is not a relation of {entity}")]
    RelationNotDefined { entity: String, relation: String },

    /// A `*ing` lifecycle listener vetoed the operation.
    #[error("{event} listener aborted the operation on {entity}")]
    OperationAborted { entity: String, event: String },

    #[error(transparent)]
    ServiceLayer(#[from] ServiceLayerError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn entity_not_configured(entity: impl Into<String>) -> Self {
        Self::EntityNotConfigured {
            entity: entity.into(),
        }
    }

    pub fn invalid_field(field: impl Into<String>) -> Self {
        Self::InvalidFieldName {
            field: field.into(),
        }
    }

    pub fn invalid_config(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSyncConfig {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Configuration and validation errors are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::EntityNotConfigured { .. }
                | Error::TableNotFound { .. }
                | Error::InvalidSyncConfig { .. }
        )
    }

    /// True when the remote side reported the record missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ModelNotFound { .. } => true,
            Error::ServiceLayer(err) => err.is_not_found(),
            _ => false,
        }
    }
}
