use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::time::Duration;

/// Per-run record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub failed: u64,
}

impl SyncCounts {
    pub fn merge(&mut self, other: SyncCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Outcome of one sync invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    entity: String,
    counts: SyncCounts,
    #[serde(rename = "duration_seconds", serialize_with = "as_seconds")]
    duration: Duration,
    success: bool,
    error: Option<String>,
    metadata: Map<String, JsonValue>,
    completed_at: DateTime<Utc>,
}

fn as_seconds<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl SyncResult {
    pub fn succeeded(entity: impl Into<String>, counts: SyncCounts, duration: Duration) -> Self {
        Self {
            entity: entity.into(),
            counts,
            duration,
            success: true,
            error: None,
            metadata: Map::new(),
            completed_at: Utc::now(),
        }
    }

    /// Failure with whatever counts were reached before the error.
    pub fn failed(
        entity: impl Into<String>,
        error: impl Into<String>,
        counts: SyncCounts,
        duration: Duration,
    ) -> Self {
        Self {
            entity: entity.into(),
            counts,
            duration,
            success: false,
            error: Some(error.into()),
            metadata: Map::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn created(&self) -> u64 {
        self.counts.created
    }

    pub fn updated(&self) -> u64 {
        self.counts.updated
    }

    pub fn deleted(&self) -> u64 {
        self.counts.deleted
    }

    pub fn failed_count(&self) -> u64 {
        self.counts.failed
    }

    pub fn counts(&self) -> SyncCounts {
        self.counts
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn total(&self) -> u64 {
        self.counts.created + self.counts.updated + self.counts.deleted
    }

    /// Records written: created plus updated.
    pub fn synced(&self) -> u64 {
        self.counts.created + self.counts.updated
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    pub fn has_failed(&self) -> bool {
        !self.success || self.counts.failed > 0
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "{}: {} created, {} updated, {} deleted",
                self.entity, self.counts.created, self.counts.updated, self.counts.deleted
            )?;
            if self.counts.failed > 0 {
                write!(f, ", {} skipped", self.counts.failed)?;
            }
            write!(f, " in {:.2}s", self.duration.as_secs_f64())
        } else {
            write!(
                f,
                "{}: failed after {:.2}s: {}",
                self.entity,
                self.duration.as_secs_f64(),
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}
