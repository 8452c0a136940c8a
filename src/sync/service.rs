//! Local Sync Service
//!
//! Mirrors remote entities into local tables. A run resolves the entity's
//! [`SyncConfig`], claims the entity through its metadata row, pages through
//! the Service Layer in primary-key order and writes each page in its own
//! transaction. Remote and database failures inside a run are recorded on the
//! metadata row and returned as a failed [`SyncResult`]; only configuration
//! problems surface as `Err`.

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use sea_orm::prelude::DateTimeWithTimeZone;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::column::key_text;
use super::config::SyncConfig;
use super::metadata::{Model as SyncMetadata, SyncMetadataRepository};
use super::registry::SyncRegistry;
use super::result::{SyncCounts, SyncResult};
use super::store::{BatchOutcome, LocalStore};
use crate::error::{Error, Result};
use crate::query::filter::{FilterValue, and_filters};
use crate::service_layer::{ODataQuery, ServiceLayer, SortDirection};

pub const DEFAULT_KEY_BATCH_SIZE: u32 = 20_000;

pub const ALREADY_RUNNING: &str = "Sync is already running for this entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// Incremental when a previous run completed, full otherwise.
    Auto,
    Full,
    FullWithDeletes,
}

impl SyncMode {
    fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Auto => "auto",
            SyncMode::Full => "full",
            SyncMode::FullWithDeletes => "full_with_deletes",
        }
    }
}

pub struct LocalSyncService {
    registry: Arc<SyncRegistry>,
    service: Arc<dyn ServiceLayer>,
    store: LocalStore,
    metadata: SyncMetadataRepository,
    key_batch_size: u32,
}

impl LocalSyncService {
    pub fn new(
        db: DatabaseConnection,
        registry: Arc<SyncRegistry>,
        service: Arc<dyn ServiceLayer>,
    ) -> Self {
        Self {
            registry,
            service,
            store: LocalStore::new(db.clone()),
            metadata: SyncMetadataRepository::new(db),
            key_batch_size: DEFAULT_KEY_BATCH_SIZE,
        }
    }

    /// Page size for the key-only scan of delete reconciliation.
    pub fn with_key_batch_size(mut self, key_batch_size: u32) -> Self {
        self.key_batch_size = key_batch_size.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn metadata(&self) -> &SyncMetadataRepository {
        &self.metadata
    }

    /// Sync `entity`, incrementally when it has completed before.
    pub async fn sync(&self, entity: &str) -> Result<SyncResult> {
        self.run(entity, SyncMode::Auto).await
    }

    pub async fn incremental_sync(&self, entity: &str) -> Result<SyncResult> {
        self.sync(entity).await
    }

    /// Sync every remote record regardless of `last_synced_at`.
    pub async fn full_sync(&self, entity: &str) -> Result<SyncResult> {
        self.run(entity, SyncMode::Full).await
    }

    /// Full sync, then soft-delete local rows whose key no longer exists
    /// remotely. The delete pass only runs for configs with `track_deletes`.
    pub async fn full_sync_with_deletes(&self, entity: &str) -> Result<SyncResult> {
        self.run(entity, SyncMode::FullWithDeletes).await
    }

    /// Sync each entity in turn. A failing entity, including one that is not
    /// configured, yields a failed result and the batch carries on.
    pub async fn sync_many<S: AsRef<str>>(&self, entities: &[S], full: bool) -> Vec<SyncResult> {
        let mode = if full { SyncMode::Full } else { SyncMode::Auto };
        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity = entity.as_ref();
            let result = match self.run(entity, mode).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(entity, error = %err, "sync skipped");
                    SyncResult::failed(entity, err.to_string(), SyncCounts::default(), Duration::ZERO)
                }
            };
            results.push(result);
        }
        results
    }

    /// Sync every known entity whose local table exists.
    pub async fn sync_all(&self, full: bool) -> Result<Vec<SyncResult>> {
        let entities = self.registry.entities_with_tables().await?;
        info!(count = entities.len(), full, "syncing all entities with local tables");
        Ok(self.sync_many(&entities, full).await)
    }

    pub async fn status(&self, entity: &str) -> Result<Option<SyncMetadata>> {
        self.metadata.find(entity).await
    }

    pub async fn statuses(&self) -> Result<Vec<SyncMetadata>> {
        self.metadata.all().await
    }

    /// Return `entity` to idle. `false` when it has never been synced.
    pub async fn reset(&self, entity: &str) -> Result<bool> {
        self.metadata.reset(entity).await
    }

    /// Create the local table(s) for `entity`.
    pub async fn create_table(&self, entity: &str) -> Result<SyncConfig> {
        let config = self.registry.get(entity)?;
        self.store.create_table(&config).await?;
        Ok(config)
    }

    #[instrument(skip(self, entity, mode), fields(entity = %entity, mode = mode.as_str()))]
    async fn run(&self, entity: &str, mode: SyncMode) -> Result<SyncResult> {
        let config = self.registry.get(entity)?;
        if !self.registry.table_exists(entity).await? {
            return Err(Error::TableNotFound {
                entity: entity.to_string(),
                table: config.table().to_string(),
            });
        }

        let metadata = self.metadata.find_or_create_for(entity).await?;
        if metadata.is_running() || !self.metadata.try_mark_running(entity).await? {
            warn!(entity, "sync already running");
            counter!("sapb1_sync_runs_total", "entity" => entity.to_string(), "outcome" => "skipped")
                .increment(1);
            return Ok(SyncResult::failed(
                entity,
                ALREADY_RUNNING,
                SyncCounts::default(),
                Duration::ZERO,
            ));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let since = match mode {
            SyncMode::Auto => metadata
                .last_synced_at
                .filter(|_| config.update_date_field().is_some()),
            SyncMode::Full | SyncMode::FullWithDeletes => None,
        };
        let strategy = if since.is_some() { "incremental" } else { "full" };
        info!(entity, strategy, batch_size = config.batch_size(), "sync started");

        let mut counts = SyncCounts::default();
        let outcome = match self
            .execute(&config, since, mode == SyncMode::FullWithDeletes, &mut counts)
            .await
        {
            Ok(()) => {
                self.metadata
                    .mark_completed(entity, counts.created + counts.updated, started_at)
                    .await
            }
            Err(err) => Err(err),
        };

        let duration = clock.elapsed();
        histogram!("sapb1_sync_duration_seconds", "entity" => entity.to_string())
            .record(duration.as_secs_f64());

        match outcome {
            Ok(()) => {
                counter!("sapb1_sync_runs_total", "entity" => entity.to_string(), "outcome" => "completed")
                    .increment(1);
                let result = SyncResult::succeeded(entity, counts, duration)
                    .with_metadata("strategy", strategy);
                info!(
                    entity,
                    created = counts.created,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    skipped = counts.failed,
                    duration_ms = duration.as_millis() as u64,
                    "sync completed"
                );
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                error!(entity, error = %message, "sync failed");
                if let Err(mark_err) = self.metadata.mark_failed(entity, &message).await {
                    error!(entity, error = %mark_err, "could not record sync failure");
                }
                counter!("sapb1_sync_runs_total", "entity" => entity.to_string(), "outcome" => "failed")
                    .increment(1);
                Ok(SyncResult::failed(entity, message, counts, duration)
                    .with_metadata("strategy", strategy))
            }
        }
    }

    async fn execute(
        &self,
        config: &SyncConfig,
        since: Option<DateTimeWithTimeZone>,
        reconcile_deletes: bool,
        counts: &mut SyncCounts,
    ) -> Result<()> {
        let since_filter = since.zip(config.update_date_field()).map(|(at, field)| {
            format!("{} ge {}", field, FilterValue::from(at.date_naive()))
        });
        let filter = and_filters(config.filter(), since_filter.as_deref());

        let batch_size = u64::from(config.batch_size());
        let mut skip = 0;
        loop {
            let mut query = ODataQuery::new()
                .select(config.remote_select())
                .order_by(config.primary_key(), SortDirection::Asc)
                .top(batch_size)
                .skip(skip);
            if let Some(filter) = &filter {
                query = query.filter(filter.clone());
            }

            let page = self.service.query(config.entity(), &query).await?.value;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as u64;

            let outcome = self.store.write_batch(config, &page).await?;
            record_batch(config.entity(), &outcome);
            counts.created += outcome.created;
            counts.updated += outcome.updated;
            counts.failed += outcome.skipped;
            debug!(
                entity = %config.entity(),
                skip,
                fetched,
                created = outcome.created,
                updated = outcome.updated,
                "page synced"
            );

            // A short page is the last one.
            if fetched < batch_size {
                break;
            }
            skip += fetched;
        }

        if reconcile_deletes {
            if config.track_deletes() {
                counts.deleted = self.reconcile_deletes(config).await?;
            } else {
                debug!(entity = %config.entity(), "delete tracking disabled, skipping reconciliation");
            }
        }
        Ok(())
    }

    /// Soft-delete every active local row whose key the remote no longer has.
    #[instrument(skip(self, config), fields(entity = %config.entity()))]
    async fn reconcile_deletes(&self, config: &SyncConfig) -> Result<u64> {
        let remote = self.remote_keys(config).await?;
        let local = self.store.active_keys(config).await?;

        let mut missing: Vec<String> = local.difference(&remote).cloned().collect();
        missing.sort();
        if missing.is_empty() {
            return Ok(0);
        }

        let deleted = self.store.soft_delete(config, &missing).await?;
        counter!("sapb1_sync_records_total", "entity" => config.entity().to_string(), "kind" => "deleted")
            .increment(deleted);
        info!(remote = remote.len(), local = local.len(), deleted, "reconciled deletes");
        Ok(deleted)
    }

    async fn remote_keys(&self, config: &SyncConfig) -> Result<HashSet<String>> {
        let key_kind = config.key_kind();
        let batch_size = u64::from(self.key_batch_size);
        let mut keys = HashSet::new();
        let mut skip = 0;
        loop {
            let mut query = ODataQuery::new()
                .select([config.primary_key()])
                .order_by(config.primary_key(), SortDirection::Asc)
                .top(batch_size)
                .skip(skip);
            if let Some(filter) = config.filter() {
                query = query.filter(filter);
            }

            let page = self.service.query(config.entity(), &query).await?.value;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as u64;
            keys.extend(
                page.iter()
                    .filter_map(|record| record.get(config.primary_key()))
                    .filter_map(|value| key_text(&key_kind.coerce(value))),
            );

            if fetched < batch_size {
                break;
            }
            skip += fetched;
        }
        Ok(keys)
    }
}

fn record_batch(entity: &str, outcome: &BatchOutcome) {
    for (kind, value) in [
        ("created", outcome.created),
        ("updated", outcome.updated),
        ("unchanged", outcome.unchanged),
        ("skipped", outcome.skipped),
    ] {
        if value > 0 {
            counter!("sapb1_sync_records_total", "entity" => entity.to_string(), "kind" => kind)
                .increment(value);
        }
    }
}
