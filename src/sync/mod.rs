//! Local synchronization of Service Layer entities into database tables.

pub mod column;
pub mod config;
pub mod metadata;
pub mod presets;
pub mod registry;
pub mod result;
pub mod service;
pub mod store;

pub use column::ColumnKind;
pub use config::{SyncConfig, SyncConfigBuilder, Transformer};
pub use metadata::{Model as SyncMetadata, SyncMetadataRepository, SyncStatus};
pub use presets::{PRESET_ENTITIES, preset};
pub use registry::SyncRegistry;
pub use result::{SyncCounts, SyncResult};
pub use service::{ALREADY_RUNNING, LocalSyncService};
pub use store::{BatchOutcome, LocalStore};
