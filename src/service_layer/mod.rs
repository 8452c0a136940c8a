//! Service Layer collaborator
//!
//! The remote side of every operation: an async trait mirroring the SAP
//! Business One Service Layer entity API, plus the request/response values
//! shared by the query builder and the sync service.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

pub use client::HttpServiceLayer;

/// JSON object as returned by the Service Layer (PascalCase keys).
pub type Record = Map<String, JsonValue>;

/// Errors raised by Service Layer calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceLayerError {
    /// Non-success HTTP status with the decoded SAP error body
    #[error("Service Layer returned {status}: {message}")]
    Http {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    /// Network or connectivity error
    #[error("network error: {details}")]
    Network { details: String },
    /// Body did not match the expected OData shape
    #[error("malformed response: {details}")]
    MalformedResponse { details: String },
    /// Login rejected or session could not be re-established
    #[error("authentication failed: {details}")]
    Authentication { details: String },
    #[error("invalid request: {details}")]
    InvalidRequest { details: String },
}

impl ServiceLayerError {
    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            details: details.into(),
        }
    }

    /// Transport failures worth retrying: connectivity, throttling, 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceLayerError::Network { .. } => true,
            ServiceLayerError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceLayerError::Http { status: 404, .. })
    }
}

impl From<reqwest::Error> for ServiceLayerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ServiceLayerError::malformed(error.to_string())
        } else {
            ServiceLayerError::Network {
                details: error.to_string(),
            }
        }
    }
}

/// Primary key of a single entity instance, rendered into `Entity(key)` paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    Str(String),
}

impl EntityKey {
    /// Builds a key from a JSON attribute value, if it is a usable scalar.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(EntityKey::Int),
            JsonValue::String(s) => Some(EntityKey::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            EntityKey::Int(value) => JsonValue::from(*value),
            EntityKey::Str(value) => JsonValue::from(value.clone()),
        }
    }
}

impl fmt::Display for EntityKey {
    /// OData key literal: numbers bare, strings quoted with `'` doubled.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(value) => write!(f, "{}", value),
            EntityKey::Str(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        EntityKey::Int(value)
    }
}

impl From<i32> for EntityKey {
    fn from(value: i32) -> Self {
        EntityKey::Int(value.into())
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        EntityKey::Str(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        EntityKey::Str(value)
    }
}

/// Sort direction for `$orderby`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// A collection read: `$filter`, `$select`, `$orderby`, `$top`, `$skip`.
///
/// Serializable so that cache keys can be derived from the full parameter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ODataQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub select: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub order_by: Vec<(String, SortDirection)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
}

impl ODataQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Query-string pairs in Service Layer form (unencoded).
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push(("$filter", filter.clone()));
        }
        if !self.select.is_empty() {
            pairs.push(("$select", self.select.join(",")));
        }
        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(field, dir)| format!("{} {}", field, dir.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("$orderby", order));
        }
        if let Some(top) = self.top {
            pairs.push(("$top", top.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("$skip", skip.to_string()));
        }
        pairs
    }
}

/// Page of records returned by a collection read.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub value: Vec<Record>,
    #[serde(rename = "odata.count", alias = "@odata.count", default)]
    pub count: Option<u64>,
    #[serde(rename = "odata.nextLink", alias = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// The remote entity API consumed by models and the sync service.
#[async_trait]
pub trait ServiceLayer: Send + Sync {
    /// Fetch one record; `Ok(None)` when the key does not exist.
    async fn find(&self, entity: &str, key: &EntityKey) -> Result<Option<Record>, ServiceLayerError>;

    async fn create(&self, entity: &str, payload: &Record) -> Result<Record, ServiceLayerError>;

    /// PATCH semantics: only the supplied fields change.
    async fn update(
        &self,
        entity: &str,
        key: &EntityKey,
        payload: &Record,
    ) -> Result<(), ServiceLayerError>;

    async fn delete(&self, entity: &str, key: &EntityKey) -> Result<(), ServiceLayerError>;

    /// Bound action such as `Close` or `Cancel` on a document.
    async fn action(
        &self,
        entity: &str,
        key: &EntityKey,
        action: &str,
    ) -> Result<Option<JsonValue>, ServiceLayerError>;

    async fn query(&self, entity: &str, query: &ODataQuery)
    -> Result<QueryResponse, ServiceLayerError>;

    /// Count matching records; only the query's filter is honoured.
    async fn count(&self, entity: &str, query: &ODataQuery) -> Result<u64, ServiceLayerError>;
}
