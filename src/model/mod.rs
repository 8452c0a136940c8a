//! # Model layer
//!
//! A thin active-record layer over the Service Layer: [`ModelDefinition`]
//! describes an entity, [`SapB1Model`] wraps one record, and
//! [`ModelContext`] carries the remote client, cache and [`ModelRegistry`]
//! into every operation.

pub mod context;
pub mod definition;
pub mod instance;
pub(crate) mod relations;
pub mod registry;

pub use context::ModelContext;
pub use definition::{ModelDefinition, Relation, RelationKind};
pub use instance::{RelationValue, SapB1Model};
pub use registry::{Listener, ModelEvent, ModelRegistry};
