//! Migration to create the sapb1_sync_metadata table.
//!
//! One row per synchronised entity, tracking run status, the last successful
//! sync timestamp and the cumulative number of records written.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncMetadata::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncMetadata::Entity)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(SyncMetadata::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncMetadata::LastCursor).text().null())
                    .col(
                        ColumnDef::new(SyncMetadata::SyncedCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncMetadata::Status)
                            .string_len(16)
                            .not_null()
                            .default("idle"),
                    )
                    .col(ColumnDef::new(SyncMetadata::Options).json().null())
                    .col(
                        ColumnDef::new(SyncMetadata::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncMetadata::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sapb1_sync_metadata_status")
                    .table(SyncMetadata::Table)
                    .col(SyncMetadata::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sapb1_sync_metadata_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncMetadata::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncMetadata {
    #[sea_orm(iden = "sapb1_sync_metadata")]
    Table,
    Id,
    Entity,
    LastSyncedAt,
    LastCursor,
    SyncedCount,
    Status,
    Options,
    CreatedAt,
    UpdatedAt,
}
