//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied and a
//! scripted in-memory Service Layer that records every call.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sapb1::service_layer::{
    EntityKey, ODataQuery, QueryResponse, Record, ServiceLayer, ServiceLayerError,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Mutex;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool holds a single connection so every statement sees the same
/// in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Builds a [`Record`] from a `json!` object literal.
pub fn record(value: JsonValue) -> Record {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// `count` items `{ItemCode: "A001", ItemName: "Item 1", UpdateDate: ...}`.
pub fn items(count: usize) -> Vec<Record> {
    (1..=count)
        .map(|n| {
            record(json!({
                "ItemCode": format!("A{:03}", n),
                "ItemName": format!("Item {}", n),
                "QuantityOnStock": n,
                "Valid": "tYES",
                "UpdateDate": "2024-03-01",
            }))
        })
        .collect()
}

/// One call observed by [`FakeServiceLayer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Find(String, EntityKey),
    Create(String, Record),
    Update(String, EntityKey, Record),
    Delete(String, EntityKey),
    Action(String, EntityKey, String),
    Query(String, ODataQuery),
    Count(String, ODataQuery),
}

/// In-memory Service Layer.
///
/// Records are held per entity in insertion order; queries page through them
/// with `$top`/`$skip` and ignore `$filter`. Key-only queries (`$select` of
/// one field) project that field.
#[derive(Default)]
pub struct FakeServiceLayer {
    records: Mutex<HashMap<String, Vec<Record>>>,
    keys: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    failing_query: Mutex<Option<(usize, ServiceLayerError)>>,
    next_key: Mutex<i64>,
}

impl FakeServiceLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote records of `entity`, keyed by `key_field`.
    pub fn seed(&self, entity: &str, key_field: &str, records: Vec<Record>) {
        self.keys
            .lock()
            .unwrap()
            .insert(entity.to_string(), key_field.to_string());
        self.records
            .lock()
            .unwrap()
            .insert(entity.to_string(), records);
    }

    /// Remove remote records whose key is in `keys`.
    pub fn remove(&self, entity: &str, keys: &[&str]) {
        let key_field = self.key_field(entity);
        if let Some(records) = self.records.lock().unwrap().get_mut(entity) {
            records.retain(|record| {
                let key = record.get(&key_field).map(key_string).unwrap_or_default();
                !keys.contains(&key.as_str())
            });
        }
    }

    /// Fail the `n`th collection query (0-based) and every one after it.
    pub fn fail_queries_from(&self, n: usize, error: ServiceLayerError) {
        *self.failing_query.lock().unwrap() = Some((n, error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<ODataQuery> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Query(_, query) => Some(query),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn remote(&self, entity: &str) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    fn key_field(&self, entity: &str) -> String {
        self.keys
            .lock()
            .unwrap()
            .get(entity)
            .cloned()
            .unwrap_or_else(|| "DocEntry".to_string())
    }

    fn position(&self, entity: &str, key: &EntityKey) -> Option<usize> {
        let key_field = self.key_field(entity);
        let wanted = match key {
            EntityKey::Int(n) => n.to_string(),
            EntityKey::Str(s) => s.clone(),
        };
        self.records
            .lock()
            .unwrap()
            .get(entity)?
            .iter()
            .position(|record| record.get(&key_field).map(key_string) == Some(wanted.clone()))
    }

    fn record_call(&self, call: Call) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        calls
            .iter()
            .filter(|c| matches!(c, Call::Query(..)))
            .count()
    }
}

fn key_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn not_found() -> ServiceLayerError {
    ServiceLayerError::Http {
        status: 404,
        code: Some(-2028),
        message: "No matching records found (ODBC -2028)".to_string(),
    }
}

#[async_trait]
impl ServiceLayer for FakeServiceLayer {
    async fn find(&self, entity: &str, key: &EntityKey) -> Result<Option<Record>, ServiceLayerError> {
        self.record_call(Call::Find(entity.to_string(), key.clone()));
        let Some(index) = self.position(entity, key) else {
            return Ok(None);
        };
        Ok(self.records.lock().unwrap().get(entity).map(|r| r[index].clone()))
    }

    async fn create(&self, entity: &str, payload: &Record) -> Result<Record, ServiceLayerError> {
        self.record_call(Call::Create(entity.to_string(), payload.clone()));
        let key_field = self.key_field(entity);
        let mut created = payload.clone();
        if !created.contains_key(&key_field) {
            let mut next = self.next_key.lock().unwrap();
            *next += 1;
            created.insert(key_field, json!(*next));
        }
        created.insert("UpdateDate".into(), json!("2024-03-01"));
        self.records
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        entity: &str,
        key: &EntityKey,
        payload: &Record,
    ) -> Result<(), ServiceLayerError> {
        self.record_call(Call::Update(
            entity.to_string(),
            key.clone(),
            payload.clone(),
        ));
        let index = self.position(entity, key).ok_or_else(not_found)?;
        if let Some(records) = self.records.lock().unwrap().get_mut(entity) {
            for (field, value) in payload {
                records[index].insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, entity: &str, key: &EntityKey) -> Result<(), ServiceLayerError> {
        self.record_call(Call::Delete(entity.to_string(), key.clone()));
        let index = self.position(entity, key).ok_or_else(not_found)?;
        if let Some(records) = self.records.lock().unwrap().get_mut(entity) {
            records.remove(index);
        }
        Ok(())
    }

    async fn action(
        &self,
        entity: &str,
        key: &EntityKey,
        action: &str,
    ) -> Result<Option<JsonValue>, ServiceLayerError> {
        self.record_call(Call::Action(
            entity.to_string(),
            key.clone(),
            action.to_string(),
        ));
        self.position(entity, key).ok_or_else(not_found)?;
        Ok(None)
    }

    async fn query(
        &self,
        entity: &str,
        query: &ODataQuery,
    ) -> Result<QueryResponse, ServiceLayerError> {
        let nth = self.record_call(Call::Query(entity.to_string(), query.clone())) - 1;
        if let Some((from, error)) = self.failing_query.lock().unwrap().clone()
            && nth >= from
        {
            return Err(error);
        }

        let records = self.remote(entity);
        let skip = query.skip.unwrap_or(0) as usize;
        let top = query.top.map(|t| t as usize).unwrap_or(usize::MAX);
        let value = records
            .into_iter()
            .skip(skip)
            .take(top)
            .map(|record| {
                if query.select.len() == 1 {
                    let field = &query.select[0];
                    let mut projected = Record::new();
                    if let Some(value) = record.get(field) {
                        projected.insert(field.clone(), value.clone());
                    }
                    projected
                } else {
                    record
                }
            })
            .collect();

        Ok(QueryResponse {
            value,
            count: None,
            next_link: None,
        })
    }

    async fn count(&self, entity: &str, query: &ODataQuery) -> Result<u64, ServiceLayerError> {
        self.record_call(Call::Count(entity.to_string(), query.clone()));
        Ok(self.remote(entity).len() as u64)
    }
}
