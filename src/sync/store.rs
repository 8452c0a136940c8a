//! Local mirror tables.
//!
//! Table and column names come from a validated [`SyncConfig`], so statements
//! are built at runtime with `sea_query` and executed through whichever
//! backend the connection uses.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, Index, OnConflict, Query, SelectStatement, SimpleExpr, Table,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbErr, ExecResult, QueryResult, StatementBuilder,
    TransactionTrait, Value,
};
use sea_orm_migration::SchemaManager;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::column::{ColumnKind, key_text};
use super::config::{DELETED_AT, SAP_UPDATED_AT, SYNCED_AT, SyncConfig};
use crate::error::Result;
use crate::service_layer::Record;

/// Keeps a single statement under SQLite's bind-parameter limit.
const MAX_BIND_PARAMS: usize = 30_000;
const KEY_CHUNK: usize = 500;

/// Counts for one written batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records dropped for lack of a usable primary key.
    pub skipped: u64,
    pub lines: u64,
}

struct PreparedRow {
    key: String,
    values: Vec<Value>,
    sap_updated_at: Value,
    lines: Vec<Vec<Value>>,
}

impl PreparedRow {
    fn comparable(&self, track_deletes: bool) -> Vec<Value> {
        let mut values = self.values.clone();
        values.push(self.sap_updated_at.clone());
        if track_deletes {
            values.push(Value::from(Some(false)));
        }
        values
    }
}

fn key_position(config: &SyncConfig) -> usize {
    config
        .columns()
        .iter()
        .position(|column| column == config.primary_key())
        .unwrap_or_default()
}

fn prepare(config: &SyncConfig, raw: &Record) -> Option<PreparedRow> {
    let record = config.transform(raw);
    let values: Vec<Value> = config
        .columns()
        .iter()
        .map(|column| {
            config
                .kind(column)
                .coerce(record.get(column).unwrap_or(&JsonValue::Null))
        })
        .collect();

    let parent_key = values.get(key_position(config))?.clone();
    let key = key_text(&parent_key)?;

    let sap_updated_at = config
        .update_date_field()
        .and_then(|field| record.get(field).or_else(|| raw.get(field)))
        .map(|value| ColumnKind::Date.coerce(value))
        .unwrap_or_else(|| ColumnKind::Date.null());

    let mut lines = Vec::new();
    if config.sync_lines() {
        let nested = record
            .get(config.lines_key())
            .or_else(|| raw.get(config.lines_key()));
        if let Some(JsonValue::Array(items)) = nested {
            for line in items.iter().filter_map(JsonValue::as_object) {
                let row = config
                    .line_table_columns()
                    .iter()
                    .map(|column| {
                        if column == config.primary_key() {
                            parent_key.clone()
                        } else {
                            config
                                .kind(column)
                                .coerce(line.get(column).unwrap_or(&JsonValue::Null))
                        }
                    })
                    .collect();
                lines.push(row);
            }
        }
    }

    Some(PreparedRow {
        key,
        values,
        sap_updated_at,
        lines,
    })
}

fn alias(name: &str) -> Alias {
    Alias::new(name)
}

fn to_exprs(values: &[Value]) -> Vec<SimpleExpr> {
    values.iter().cloned().map(SimpleExpr::from).collect()
}

async fn exec<C, S>(conn: &C, statement: &S) -> std::result::Result<ExecResult, DbErr>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    conn.execute(backend.build(statement)).await
}

async fn query<C>(conn: &C, statement: &SelectStatement) -> std::result::Result<Vec<QueryResult>, DbErr>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    conn.query_all(backend.build(statement)).await
}

/// Reads and writes the mirror tables of synced entities.
#[derive(Clone)]
pub struct LocalStore {
    db: DatabaseConnection,
}

impl LocalStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create the mirror table (and line table) for `config` if missing.
    pub async fn create_table(&self, config: &SyncConfig) -> Result<()> {
        let manager = SchemaManager::new(&self.db);

        let mut table = Table::create();
        table.table(alias(config.table())).if_not_exists();
        for column in config.columns() {
            let mut def = ColumnDef::new(alias(column));
            config.kind(column).apply(&mut def);
            if column == config.primary_key() {
                def.not_null().primary_key();
            } else {
                def.null();
            }
            table.col(&mut def);
        }
        table.col(
            ColumnDef::new(alias(SYNCED_AT))
                .timestamp_with_time_zone()
                .null(),
        );
        table.col(ColumnDef::new(alias(SAP_UPDATED_AT)).date().null());
        if config.track_deletes() {
            table.col(
                ColumnDef::new(alias(DELETED_AT))
                    .timestamp_with_time_zone()
                    .null(),
            );
        }
        manager.create_table(table.to_owned()).await?;

        if let Some(lines_table) = config.lines_table() {
            let mut lines = Table::create();
            lines.table(alias(lines_table)).if_not_exists();
            for column in config.line_table_columns() {
                let mut def = ColumnDef::new(alias(&column));
                config.kind(&column).apply(&mut def);
                if column == config.primary_key() {
                    def.not_null();
                } else {
                    def.null();
                }
                lines.col(&mut def);
            }
            manager.create_table(lines.to_owned()).await?;

            manager
                .create_index(
                    Index::create()
                        .name(format!("idx_{}_{}", lines_table, config.primary_key()))
                        .table(alias(lines_table))
                        .col(alias(config.primary_key()))
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        info!(entity = %config.entity(), table = %config.table(), "local table ready");
        Ok(())
    }

    /// Upsert one page of remote records (and replace their lines) in a
    /// single transaction.
    ///
    /// Existing rows are read first. Rows identical after coercion are only
    /// stamped with a new `synced_at`, so re-running a batch reports nothing
    /// created or updated.
    pub async fn write_batch(&self, config: &SyncConfig, records: &[Record]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        // Later duplicates of a key win, as they would remotely.
        let mut order: Vec<String> = Vec::new();
        let mut rows: HashMap<String, PreparedRow> = HashMap::new();
        for raw in records {
            match prepare(config, raw) {
                Some(row) => {
                    if !rows.contains_key(&row.key) {
                        order.push(row.key.clone());
                    }
                    rows.insert(row.key.clone(), row);
                }
                None => outcome.skipped += 1,
            }
        }
        if rows.is_empty() {
            return Ok(outcome);
        }

        let key_kind = config.key_kind();
        let keys: Vec<Value> = order.iter().map(|key| key_kind.key_value(key)).collect();
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let existing = self.existing_rows(&txn, config, &keys).await?;

        let mut changed: Vec<&PreparedRow> = Vec::new();
        let mut unchanged: Vec<Value> = Vec::new();
        for key in &order {
            let Some(row) = rows.get(key) else { continue };
            match existing.get(key) {
                None => {
                    outcome.created += 1;
                    changed.push(row);
                }
                Some(current) if *current != row.comparable(config.track_deletes()) => {
                    outcome.updated += 1;
                    changed.push(row);
                }
                Some(_) => {
                    outcome.unchanged += 1;
                    unchanged.push(key_kind.key_value(key));
                }
            }
        }

        self.upsert(&txn, config, &changed, now).await?;
        self.touch(&txn, config, &unchanged, now).await?;

        if config.sync_lines() {
            let lines: Vec<&Vec<Value>> = order
                .iter()
                .filter_map(|key| rows.get(key))
                .flat_map(|row| row.lines.iter())
                .collect();
            outcome.lines = self.replace_lines(&txn, config, &keys, &lines).await?;
        }

        txn.commit().await?;

        debug!(
            entity = %config.entity(),
            created = outcome.created,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            skipped = outcome.skipped,
            lines = outcome.lines,
            "batch written"
        );
        Ok(outcome)
    }

    async fn existing_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &SyncConfig,
        keys: &[Value],
    ) -> Result<HashMap<String, Vec<Value>>> {
        let pk = key_position(config);
        let mut existing = HashMap::new();

        for chunk in keys.chunks(KEY_CHUNK) {
            let mut select = Query::select();
            select
                .columns(config.columns().iter().map(|c| alias(c)))
                .column(alias(SAP_UPDATED_AT))
                .from(alias(config.table()))
                .and_where(Expr::col(alias(config.primary_key())).is_in(to_exprs(chunk)));
            if config.track_deletes() {
                select.column(alias(DELETED_AT));
            }

            for row in query(conn, &select).await? {
                let mut values = Vec::with_capacity(config.columns().len() + 2);
                for column in config.columns() {
                    values.push(config.kind(column).read(&row, column)?);
                }
                values.push(ColumnKind::Date.read(&row, SAP_UPDATED_AT)?);
                if config.track_deletes() {
                    let deleted = row
                        .try_get::<Option<DateTime<Utc>>>("", DELETED_AT)?
                        .is_some();
                    values.push(Value::from(Some(deleted)));
                }
                if let Some(key) = values.get(pk).and_then(key_text) {
                    existing.insert(key, values);
                }
            }
        }
        Ok(existing)
    }

    async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &SyncConfig,
        rows: &[&PreparedRow],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut columns: Vec<String> = config.columns().to_vec();
        columns.push(SYNCED_AT.to_string());
        columns.push(SAP_UPDATED_AT.to_string());
        if config.track_deletes() {
            columns.push(DELETED_AT.to_string());
        }
        let updatable: Vec<Alias> = columns
            .iter()
            .filter(|c| c.as_str() != config.primary_key())
            .map(|c| alias(c))
            .collect();

        let per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        for chunk in rows.chunks(per_statement) {
            let mut insert = Query::insert();
            insert
                .into_table(alias(config.table()))
                .columns(columns.iter().map(|c| alias(c)));

            for row in chunk {
                let mut values = row.values.clone();
                values.push(Value::from(Some(now)));
                values.push(row.sap_updated_at.clone());
                if config.track_deletes() {
                    // Reappearing records are revived.
                    values.push(Value::from(None::<DateTime<Utc>>));
                }
                insert
                    .values(to_exprs(&values))
                    .map_err(|e| DbErr::Custom(e.to_string()))?;
            }

            insert.on_conflict(
                OnConflict::column(alias(config.primary_key()))
                    .update_columns(updatable.clone())
                    .to_owned(),
            );
            exec(conn, &insert).await?;
        }
        Ok(())
    }

    async fn touch<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &SyncConfig,
        keys: &[Value],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for chunk in keys.chunks(KEY_CHUNK) {
            let update = Query::update()
                .table(alias(config.table()))
                .value(alias(SYNCED_AT), Value::from(Some(now)))
                .and_where(Expr::col(alias(config.primary_key())).is_in(to_exprs(chunk)))
                .to_owned();
            exec(conn, &update).await?;
        }
        Ok(())
    }

    async fn replace_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &SyncConfig,
        parent_keys: &[Value],
        lines: &[&Vec<Value>],
    ) -> Result<u64> {
        let Some(lines_table) = config.lines_table() else {
            return Ok(0);
        };

        for chunk in parent_keys.chunks(KEY_CHUNK) {
            let delete = Query::delete()
                .from_table(alias(lines_table))
                .and_where(Expr::col(alias(config.primary_key())).is_in(to_exprs(chunk)))
                .to_owned();
            exec(conn, &delete).await?;
        }

        let columns = config.line_table_columns();
        let per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        for chunk in lines.chunks(per_statement) {
            let mut insert = Query::insert();
            insert
                .into_table(alias(lines_table))
                .columns(columns.iter().map(|c| alias(c)));
            for line in chunk {
                insert
                    .values(to_exprs(line))
                    .map_err(|e| DbErr::Custom(e.to_string()))?;
            }
            exec(conn, &insert).await?;
        }
        Ok(lines.len() as u64)
    }

    /// Keys of rows not soft-deleted.
    pub async fn active_keys(&self, config: &SyncConfig) -> Result<HashSet<String>> {
        let mut select = Query::select();
        select
            .column(alias(config.primary_key()))
            .from(alias(config.table()));
        if config.track_deletes() {
            select.and_where(Expr::col(alias(DELETED_AT)).is_null());
        }

        let kind = config.key_kind();
        let mut keys = HashSet::new();
        for row in query(&self.db, &select).await? {
            if let Some(key) = key_text(&kind.read(&row, config.primary_key())?) {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    /// Stamp `deleted_at` on the given rows if not already deleted.
    pub async fn soft_delete(&self, config: &SyncConfig, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let kind = config.key_kind();
        let values: Vec<Value> = keys.iter().map(|key| kind.key_value(key)).collect();
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let mut deleted = 0;
        for chunk in values.chunks(KEY_CHUNK) {
            let update = Query::update()
                .table(alias(config.table()))
                .value(alias(DELETED_AT), Value::from(Some(now)))
                .and_where(Expr::col(alias(config.primary_key())).is_in(to_exprs(chunk)))
                .and_where(Expr::col(alias(DELETED_AT)).is_null())
                .to_owned();
            deleted += exec(&txn, &update).await?.rows_affected();
        }
        txn.commit().await?;
        Ok(deleted)
    }

    /// Number of rows in the mirror table, soft-deleted ones included.
    pub async fn count(&self, config: &SyncConfig) -> Result<u64> {
        count_rows(&self.db, config.table()).await
    }

    pub async fn count_lines(&self, config: &SyncConfig) -> Result<u64> {
        match config.lines_table() {
            Some(table) => count_rows(&self.db, table).await,
            None => Ok(0),
        }
    }
}

async fn count_rows(db: &DatabaseConnection, table: &str) -> Result<u64> {
    let select = Query::select()
        .expr_as(Expr::cust("COUNT(*)"), alias("n"))
        .from(alias(table))
        .to_owned();
    let rows = query(db, &select).await?;
    let count = match rows.first() {
        Some(row) => row.try_get::<i64>("", "n")?,
        None => 0,
    };
    Ok(count.max(0) as u64)
}
