//! Database migrations for the SAP B1 toolkit.
//!
//! Only the bookkeeping tables owned by the toolkit live here. Per-entity
//! mirror tables are created at runtime from their sync configuration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_15_090000_create_sync_metadata;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2025_01_15_090000_create_sync_metadata::Migration)]
    }
}
