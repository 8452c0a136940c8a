//! Per-entity sync descriptors.

use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::column::ColumnKind;
use crate::error::{Error, Result};
use crate::service_layer::Record;

pub const DEFAULT_BATCH_SIZE: u32 = 5000;
pub const DEFAULT_UPDATE_DATE_FIELD: &str = "UpdateDate";
pub const DEFAULT_LINES_KEY: &str = "DocumentLines";

/// Bookkeeping columns added to every mirror table.
pub const SYNCED_AT: &str = "synced_at";
pub const SAP_UPDATED_AT: &str = "sap_updated_at";
pub const DELETED_AT: &str = "deleted_at";

const RESERVED_COLUMNS: [&str; 3] = [SYNCED_AT, SAP_UPDATED_AT, DELETED_AT];

/// Maps a raw remote record to the record that gets persisted.
pub type Transformer = Arc<dyn Fn(&Record) -> Record + Send + Sync>;

fn identifier() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Immutable description of how one remote entity is mirrored locally.
#[derive(Clone)]
pub struct SyncConfig {
    entity: String,
    table: String,
    primary_key: String,
    columns: Vec<String>,
    kinds: HashMap<String, ColumnKind>,
    update_date_field: Option<String>,
    batch_size: u32,
    sync_lines: bool,
    lines_key: String,
    lines_table: Option<String>,
    line_columns: Option<Vec<String>>,
    transformer: Option<Transformer>,
    filter: Option<String>,
    track_deletes: bool,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("entity", &self.entity)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("update_date_field", &self.update_date_field)
            .field("batch_size", &self.batch_size)
            .field("lines_table", &self.lines_table)
            .field("transformer", &self.transformer.is_some())
            .field("filter", &self.filter)
            .field("track_deletes", &self.track_deletes)
            .finish()
    }
}

impl SyncConfig {
    pub fn builder(
        entity: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> SyncConfigBuilder {
        SyncConfigBuilder::new(entity, table, primary_key)
    }

    /// Builder seeded with this config, for deriving a variant.
    pub fn to_builder(&self) -> SyncConfigBuilder {
        SyncConfigBuilder {
            config: self.clone(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn kind(&self, column: &str) -> ColumnKind {
        self.kinds.get(column).copied().unwrap_or_default()
    }

    pub fn key_kind(&self) -> ColumnKind {
        self.kind(&self.primary_key)
    }

    pub fn update_date_field(&self) -> Option<&str> {
        self.update_date_field.as_deref()
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn sync_lines(&self) -> bool {
        self.sync_lines
    }

    /// Field of the parent record holding the line array.
    pub fn lines_key(&self) -> &str {
        &self.lines_key
    }

    pub fn lines_table(&self) -> Option<&str> {
        self.lines_table.as_deref()
    }

    /// Columns of the line table: the parent key first, then the line columns.
    pub fn line_table_columns(&self) -> Vec<String> {
        let mut columns = vec![self.primary_key.clone()];
        if let Some(lines) = &self.line_columns {
            columns.extend(lines.iter().filter(|c| **c != self.primary_key).cloned());
        }
        columns
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn track_deletes(&self) -> bool {
        self.track_deletes
    }

    pub fn has_transformer(&self) -> bool {
        self.transformer.is_some()
    }

    /// Persistable form of a raw record: the transformer's output, or the
    /// configured columns projected out of the raw record.
    pub fn transform(&self, raw: &Record) -> Record {
        match &self.transformer {
            Some(transformer) => transformer(raw),
            None => self
                .columns
                .iter()
                .map(|column| {
                    let value = raw.get(column).cloned().unwrap_or(JsonValue::Null);
                    (column.clone(), value)
                })
                .collect(),
        }
    }

    /// Fields to request with `$select`, or empty when a transformer may need
    /// fields beyond the configured columns.
    pub fn remote_select(&self) -> Vec<String> {
        if self.transformer.is_some() {
            return Vec::new();
        }
        let mut fields = self.columns.clone();
        if let Some(field) = &self.update_date_field
            && !fields.contains(field)
        {
            fields.push(field.clone());
        }
        if self.sync_lines && !fields.contains(&self.lines_key) {
            fields.push(self.lines_key.clone());
        }
        fields
    }
}

#[derive(Clone)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    fn new(
        entity: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            config: SyncConfig {
                entity: entity.into(),
                table: table.into(),
                primary_key: primary_key.into(),
                columns: Vec::new(),
                kinds: HashMap::new(),
                update_date_field: Some(DEFAULT_UPDATE_DATE_FIELD.to_string()),
                batch_size: DEFAULT_BATCH_SIZE,
                sync_lines: false,
                lines_key: DEFAULT_LINES_KEY.to_string(),
                lines_table: None,
                line_columns: None,
                transformer: None,
                filter: None,
                track_deletes: false,
            },
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(mut self, column: impl Into<String>, kind: ColumnKind) -> Self {
        self.config.kinds.insert(column.into(), kind);
        self
    }

    pub fn kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnKind)>,
        S: Into<String>,
    {
        for (column, kind) in kinds {
            self.config.kinds.insert(column.into(), kind);
        }
        self
    }

    /// `None` disables incremental sync for the entity.
    pub fn update_date_field(mut self, field: Option<&str>) -> Self {
        self.config.update_date_field = field.map(str::to_string);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn lines<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.sync_lines = true;
        self.config.lines_table = Some(table.into());
        self.config.line_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Mark lines as synced without naming a table; `build` rejects this
    /// unless a table and columns are supplied as well.
    pub fn sync_lines(mut self, enabled: bool) -> Self {
        self.config.sync_lines = enabled;
        self
    }

    pub fn lines_key(mut self, key: impl Into<String>) -> Self {
        self.config.lines_key = key.into();
        self
    }

    pub fn transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(&Record) -> Record + Send + Sync + 'static,
    {
        self.config.transformer = Some(Arc::new(transformer));
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    pub fn track_deletes(mut self, enabled: bool) -> Self {
        self.config.track_deletes = enabled;
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let config = self.config;
        let invalid = |reason: String| Error::invalid_config(&config.entity, reason);

        if config.entity.trim().is_empty() {
            return Err(invalid("entity name is empty".into()));
        }
        if !is_identifier(&config.table) {
            return Err(invalid(format!("bad table name '{}'", config.table)));
        }
        if config.columns.is_empty() {
            return Err(invalid("no columns configured".into()));
        }
        check_columns(&config.columns).map_err(invalid)?;
        if !config.columns.contains(&config.primary_key) {
            return Err(invalid(format!(
                "primary key '{}' is not one of the columns",
                config.primary_key
            )));
        }
        if !config.key_kind().is_key_kind() {
            return Err(invalid("primary key must be a text or integer column".into()));
        }
        if config.batch_size == 0 {
            return Err(invalid("batch size must be greater than zero".into()));
        }
        if let Some(field) = &config.update_date_field {
            if !is_identifier(field) {
                return Err(invalid(format!("bad update date field '{}'", field)));
            }
        }

        if config.sync_lines {
            let (Some(table), Some(columns)) = (&config.lines_table, &config.line_columns) else {
                return Err(invalid("line sync needs a lines table and line columns".into()));
            };
            if !is_identifier(table) {
                return Err(invalid(format!("bad lines table name '{}'", table)));
            }
            if table == &config.table {
                return Err(invalid("lines table must differ from the parent table".into()));
            }
            if columns.is_empty() {
                return Err(invalid("line sync needs at least one line column".into()));
            }
            check_columns(columns).map_err(invalid)?;
        }

        Ok(config)
    }
}

fn is_identifier(name: &str) -> bool {
    identifier().is_match(name)
}

fn check_columns(columns: &[String]) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    for column in columns {
        if !is_identifier(column) {
            return Err(format!("bad column name '{}'", column));
        }
        if RESERVED_COLUMNS.contains(&column.as_str()) {
            return Err(format!("column '{}' is reserved for bookkeeping", column));
        }
        if !seen.insert(column.as_str()) {
            return Err(format!("column '{}' is listed twice", column));
        }
    }
    Ok(())
}
