//! Column kinds and coercion of remote JSON into local column values.
//!
//! Coercion is deliberately lenient: a value that cannot be read as the
//! column's kind is stored as NULL instead of failing the batch.

use chrono::NaiveDate;
use sea_orm::sea_query::ColumnDef;
use sea_orm::{DbErr, QueryResult, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    /// Nested objects or arrays, stored as JSON text.
    Json,
}

impl ColumnKind {
    /// Kinds usable as a primary key.
    pub fn is_key_kind(&self) -> bool {
        matches!(self, ColumnKind::Text | ColumnKind::Integer)
    }

    pub(crate) fn apply(&self, column: &mut ColumnDef) {
        match self {
            ColumnKind::Text | ColumnKind::Json => column.text(),
            ColumnKind::Integer => column.big_integer(),
            ColumnKind::Decimal => column.double(),
            ColumnKind::Boolean => column.boolean(),
            ColumnKind::Date => column.date(),
        };
    }

    pub fn null(&self) -> Value {
        match self {
            ColumnKind::Text | ColumnKind::Json => Value::from(None::<String>),
            ColumnKind::Integer => Value::from(None::<i64>),
            ColumnKind::Decimal => Value::from(None::<f64>),
            ColumnKind::Boolean => Value::from(None::<bool>),
            ColumnKind::Date => Value::from(None::<NaiveDate>),
        }
    }

    /// Convert a remote value into this kind.
    pub fn coerce(&self, value: &JsonValue) -> Value {
        if value.is_null() {
            return self.null();
        }
        match self {
            ColumnKind::Text => Value::from(Some(match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })),
            ColumnKind::Json => Value::from(Some(value.to_string())),
            ColumnKind::Integer => Value::from(as_i64(value)),
            ColumnKind::Decimal => Value::from(as_f64(value)),
            ColumnKind::Boolean => Value::from(as_bool(value)),
            ColumnKind::Date => Value::from(as_date(value)),
        }
    }

    /// Read a column of this kind back from a result row.
    pub fn read(&self, row: &QueryResult, column: &str) -> Result<Value, DbErr> {
        Ok(match self {
            ColumnKind::Text | ColumnKind::Json => {
                Value::from(row.try_get::<Option<String>>("", column)?)
            }
            ColumnKind::Integer => Value::from(row.try_get::<Option<i64>>("", column)?),
            ColumnKind::Decimal => Value::from(row.try_get::<Option<f64>>("", column)?),
            ColumnKind::Boolean => Value::from(row.try_get::<Option<bool>>("", column)?),
            ColumnKind::Date => Value::from(row.try_get::<Option<NaiveDate>>("", column)?),
        })
    }

    /// Parse a key's text form back into a value of this kind.
    pub fn key_value(&self, key: &str) -> Value {
        match self {
            ColumnKind::Integer => Value::from(key.parse::<i64>().ok()),
            _ => Value::from(Some(key.to_string())),
        }
    }
}

/// Text form of a key value, used to diff key sets.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::BigInt(Some(n)) => Some(n.to_string()),
        Value::String(Some(s)) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0),
        JsonValue::String(s) => match s.trim() {
            "tYES" | "Y" | "y" | "true" | "1" => Some(true),
            "tNO" | "N" | "n" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts `2024-01-15`, `2024-01-15T00:00:00Z` and `20240115`.
fn as_date(value: &JsonValue) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    let head = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boolean_coercion_understands_sap_enums() {
        assert_eq!(ColumnKind::Boolean.coerce(&json!("tYES")), Value::from(Some(true)));
        assert_eq!(ColumnKind::Boolean.coerce(&json!("tNO")), Value::from(Some(false)));
        assert_eq!(ColumnKind::Boolean.coerce(&json!(1)), Value::from(Some(true)));
        assert_eq!(ColumnKind::Boolean.coerce(&json!("maybe")), Value::from(None::<bool>));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(ColumnKind::Integer.coerce(&json!("42")), Value::from(Some(42_i64)));
        assert_eq!(ColumnKind::Integer.coerce(&json!(7.0)), Value::from(Some(7_i64)));
        assert_eq!(ColumnKind::Integer.coerce(&json!(7.5)), Value::from(None::<i64>));
        assert_eq!(ColumnKind::Decimal.coerce(&json!("12.50")), Value::from(Some(12.5_f64)));
    }

    #[test]
    fn test_date_coercion() {
        let expected = Value::from(NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(ColumnKind::Date.coerce(&json!("2024-01-15")), expected);
        assert_eq!(ColumnKind::Date.coerce(&json!("2024-01-15T00:00:00Z")), expected);
        assert_eq!(ColumnKind::Date.coerce(&json!("20240115")), expected);
        assert_eq!(ColumnKind::Date.coerce(&json!("soon")), ColumnKind::Date.null());
    }

    #[test]
    fn test_text_and_json_coercion() {
        assert_eq!(ColumnKind::Text.coerce(&json!(5)), Value::from(Some("5".to_string())));
        assert_eq!(
            ColumnKind::Json.coerce(&json!({"a": [1, 2]})),
            Value::from(Some(r#"{"a":[1,2]}"#.to_string()))
        );
        assert_eq!(ColumnKind::Text.coerce(&json!(null)), ColumnKind::Text.null());
    }

    #[test]
    fn test_key_text_round_trip() {
        assert_eq!(key_text(&ColumnKind::Integer.key_value("15")), Some("15".into()));
        assert_eq!(key_text(&ColumnKind::Text.key_value("A1")), Some("A1".into()));
        assert_eq!(key_text(&ColumnKind::Text.null()), None);
    }
}
