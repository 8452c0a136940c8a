//! SyncMetadata entity and repository
//!
//! One row per entity in `sapb1_sync_metadata`, tracking run status, the last
//! successful sync and the cumulative number of records written.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue::NotSet, DatabaseConnection, QueryOrder, Set};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "sapb1_sync_metadata")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Remote entity name, e.g. `Items`
    #[sea_orm(unique)]
    pub entity: String,

    /// Start time of the last successful run; drives incremental sync
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Reserved for resumable sync; not written by the sync service
    pub last_cursor: Option<String>,

    pub synced_count: i64,

    pub status: String,

    /// Free-form bag, holds `last_error` / `last_error_at` after a failure
    #[sea_orm(column_type = "Json", nullable)]
    pub options: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "idle" => Ok(SyncStatus::Idle),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

impl Model {
    /// Parsed status; unknown values read as idle.
    pub fn sync_status(&self) -> SyncStatus {
        self.status.parse().unwrap_or_else(|err| {
            warn!(entity = %self.entity, error = %err, "treating unknown sync status as idle");
            SyncStatus::Idle
        })
    }

    pub fn is_running(&self) -> bool {
        self.sync_status() == SyncStatus::Running
    }

    pub fn option(&self, key: &str) -> Option<&JsonValue> {
        self.options.as_ref()?.get(key)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.option("last_error")?.as_str()
    }
}

fn options_map(options: &Option<JsonValue>) -> Map<String, JsonValue> {
    match options {
        Some(JsonValue::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Repository for sync metadata rows.
#[derive(Clone)]
pub struct SyncMetadataRepository {
    db: DatabaseConnection,
}

impl SyncMetadataRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, entity: &str) -> Result<Option<Model>> {
        Ok(Entity::find()
            .filter(Column::Entity.eq(entity))
            .one(&self.db)
            .await?)
    }

    pub async fn all(&self) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .order_by_asc(Column::Entity)
            .all(&self.db)
            .await?)
    }

    /// Existing row for `entity`, or a fresh idle one.
    pub async fn find_or_create_for(&self, entity: &str) -> Result<Model> {
        if let Some(existing) = self.find(entity).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let row = ActiveModel {
            id: NotSet,
            entity: Set(entity.to_string()),
            last_synced_at: Set(None),
            last_cursor: Set(None),
            synced_count: Set(0),
            status: Set(SyncStatus::Idle.as_str().to_string()),
            options: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match row.insert(&self.db).await {
            Ok(model) => {
                debug!(entity, "created sync metadata");
                Ok(model)
            }
            // Another process created it between our read and insert.
            Err(err) => match self.find(entity).await? {
                Some(existing) => Ok(existing),
                None => Err(err.into()),
            },
        }
    }

    /// Atomically move `entity` to running unless it already is.
    /// Returns `false` when another run holds it.
    pub async fn try_mark_running(&self, entity: &str) -> Result<bool> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncStatus::Running.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Entity.eq(entity))
            .filter(Column::Status.ne(SyncStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Record a successful run that started at `started_at` and wrote `synced`
    /// records.
    pub async fn mark_completed(
        &self,
        entity: &str,
        synced: u64,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(existing) = self.find(entity).await? else {
            return Ok(());
        };
        let mut options = options_map(&existing.options);
        options.remove("last_error");
        options.remove("last_error_at");

        let options = (!options.is_empty()).then_some(JsonValue::Object(options));

        // Status and count move together in one statement.
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncStatus::Completed.as_str()))
            .col_expr(
                Column::LastSyncedAt,
                Expr::value(started_at.fixed_offset()),
            )
            .col_expr(Column::Options, Expr::value(options))
            .col_expr(
                Column::SyncedCount,
                Expr::col(Column::SyncedCount).add(synced as i64),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(existing.id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, entity: &str, message: &str) -> Result<()> {
        let Some(existing) = self.find(entity).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let mut options = options_map(&existing.options);
        options.insert("last_error".into(), json!(message));
        options.insert("last_error_at".into(), json!(now.to_rfc3339()));

        let mut row: ActiveModel = existing.into();
        row.status = Set(SyncStatus::Failed.as_str().to_string());
        row.options = Set(Some(JsonValue::Object(options)));
        row.updated_at = Set(now.fixed_offset());
        row.update(&self.db).await?;
        Ok(())
    }

    /// Return `entity` to idle and clear the recorded error. Also the only way
    /// to release a run left as running by a killed process.
    pub async fn reset(&self, entity: &str) -> Result<bool> {
        let Some(existing) = self.find(entity).await? else {
            return Ok(false);
        };
        let mut options = options_map(&existing.options);
        options.remove("last_error");
        options.remove("last_error_at");

        let mut row: ActiveModel = existing.into();
        row.status = Set(SyncStatus::Idle.as_str().to_string());
        row.options = Set((!options.is_empty()).then_some(JsonValue::Object(options)));
        row.updated_at = Set(Utc::now().fixed_offset());
        row.update(&self.db).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SyncStatus::Idle,
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SyncStatus>().is_err());
    }

    async fn repository() -> SyncMetadataRepository {
        use migration::{Migrator, MigratorTrait};

        let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1);
        let db = sea_orm::Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        SyncMetadataRepository::new(db)
    }

    #[tokio::test]
    async fn test_mark_completed_advances_status_and_count_together() {
        let repo = repository().await;
        repo.find_or_create_for("Items").await.unwrap();
        assert!(repo.try_mark_running("Items").await.unwrap());
        repo.mark_failed("Items", "boom").await.unwrap();

        let started_at = Utc::now();
        repo.mark_completed("Items", 3, started_at).await.unwrap();
        repo.mark_completed("Items", 2, started_at).await.unwrap();

        let row = repo.find("Items").await.unwrap().unwrap();
        assert_eq!(row.sync_status(), SyncStatus::Completed);
        assert_eq!(row.synced_count, 5);
        assert_eq!(
            row.last_synced_at.map(|at| at.timestamp()),
            Some(started_at.timestamp())
        );
        assert_eq!(row.last_error(), None);
        assert_eq!(row.options, None);
    }

    #[tokio::test]
    async fn test_mark_completed_ignores_unknown_entities() {
        let repo = repository().await;
        repo.mark_completed("Orders", 4, Utc::now()).await.unwrap();
        assert!(repo.find("Orders").await.unwrap().is_none());
    }
}
