//! OData `$filter` construction.
//!
//! Field names are interpolated unescaped, so every name is checked against
//! [`validate_field`] before it is stored. Values are rendered as OData
//! literals with single quotes doubled.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

fn field_pattern() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // Identifier, optionally dotted for nested properties: Address.City
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
    })
}

/// Validate a caller-supplied field name.
pub fn validate_field(field: &str) -> Result<&str> {
    if field_pattern().is_match(field) {
        Ok(field)
    } else {
        Err(Error::invalid_field(field))
    }
}

/// A scalar on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    String(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("null"),
            FilterValue::Bool(value) => write!(f, "{}", value),
            FilterValue::Int(value) => write!(f, "{}", value),
            FilterValue::Float(value) => write!(f, "{}", value),
            FilterValue::Date(value) => write!(f, "'{}'", value.format("%Y-%m-%d")),
            FilterValue::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        FilterValue::Int(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        FilterValue::String(value.clone())
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::Date(value)
    }
}

impl From<NaiveDateTime> for FilterValue {
    fn from(value: NaiveDateTime) -> Self {
        FilterValue::Date(value.date())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Date(value.date_naive())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

impl From<&JsonValue> for FilterValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FilterValue::Null,
            JsonValue::Bool(b) => FilterValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => FilterValue::Int(i),
                None => FilterValue::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => FilterValue::String(s.clone()),
            other => FilterValue::String(other.to_string()),
        }
    }
}

impl From<JsonValue> for FilterValue {
    fn from(value: JsonValue) -> Self {
        FilterValue::from(&value)
    }
}

/// OData comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    /// Accepts OData names and the usual symbolic aliases.
    pub fn parse(operator: &str) -> Result<Self> {
        match operator.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Operator::Eq),
            "!=" | "<>" | "ne" => Ok(Operator::Ne),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "ge" => Ok(Operator::Ge),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "le" => Ok(Operator::Le),
            _ => Err(Error::InvalidOperator {
                operator: operator.to_string(),
            }),
        }
    }

    pub fn as_odata(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    fn as_str(&self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Basic {
        field: String,
        operator: Operator,
        value: FilterValue,
    },
    In {
        field: String,
        values: Vec<FilterValue>,
        negated: bool,
    },
    Between {
        field: String,
        low: FilterValue,
        high: FilterValue,
    },
    Null {
        field: String,
        negated: bool,
    },
}

impl Constraint {
    /// True for constraints that can never match, i.e. `in` over an empty list.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Constraint::In { values, negated: false, .. } if values.is_empty())
    }

    fn render(&self) -> String {
        match self {
            Constraint::Basic {
                field,
                operator,
                value,
            } => format!("{} {} {}", field, operator.as_odata(), value),
            Constraint::In {
                field,
                values,
                negated,
            } => {
                // An empty list matches nothing (or, negated, everything).
                if values.is_empty() {
                    return if *negated { "true" } else { "false" }.to_string();
                }
                let (op, joiner) = if *negated {
                    ("ne", " and ")
                } else {
                    ("eq", " or ")
                };
                let parts = values
                    .iter()
                    .map(|value| format!("{} {} {}", field, op, value))
                    .collect::<Vec<_>>()
                    .join(joiner);
                format!("({})", parts)
            }
            Constraint::Between { field, low, high } => {
                format!("({} ge {} and {} le {})", field, low, field, high)
            }
            Constraint::Null { field, negated } => {
                format!("{} {} null", field, if *negated { "ne" } else { "eq" })
            }
        }
    }
}

/// One constraint plus the boolean joining it to its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    pub boolean: Boolean,
    pub constraint: Constraint,
}

/// Join constraints in insertion order. The first constraint's boolean is
/// ignored.
pub fn build_filter(wheres: &[Where]) -> Option<String> {
    if wheres.is_empty() {
        return None;
    }

    let mut filter = String::new();
    for (index, clause) in wheres.iter().enumerate() {
        if index > 0 {
            filter.push(' ');
            filter.push_str(clause.boolean.as_str());
            filter.push(' ');
        }
        filter.push_str(&clause.constraint.render());
    }
    Some(filter)
}

/// AND two optional filter expressions, parenthesising each side.
pub fn and_filters(left: Option<&str>, right: Option<&str>) -> Option<String> {
    match (left, right) {
        (Some(l), Some(r)) => Some(format!("({}) and ({})", l, r)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(boolean: Boolean, field: &str, op: &str, value: impl Into<FilterValue>) -> Where {
        Where {
            boolean,
            constraint: Constraint::Basic {
                field: validate_field(field).unwrap().to_string(),
                operator: Operator::parse(op).unwrap(),
                value: value.into(),
            },
        }
    }

    #[test]
    fn test_first_clause_has_no_boolean_prefix() {
        let wheres = vec![
            basic(Boolean::Or, "Qty", ">", 0),
            basic(Boolean::Or, "Status", "eq", "Open"),
        ];
        assert_eq!(
            build_filter(&wheres).as_deref(),
            Some("Qty gt 0 or Status eq 'Open'")
        );
    }

    #[test]
    fn test_string_values_double_single_quotes() {
        let wheres = vec![basic(Boolean::And, "Name", "=", "O'Brien")];
        assert_eq!(build_filter(&wheres).as_deref(), Some("Name eq 'O''Brien'"));
    }

    #[test]
    fn test_field_validation() {
        assert!(validate_field("ItemCode").is_ok());
        assert!(validate_field("_private").is_ok());
        assert!(validate_field("Address.City").is_ok());
        assert!(matches!(
            validate_field("Qty; DROP"),
            Err(Error::InvalidFieldName { .. })
        ));
        assert!(validate_field("1Qty").is_err());
        assert!(validate_field("Qty eq 1 or 1").is_err());
        assert!(validate_field("Address.").is_err());
        assert!(validate_field("").is_err());
    }

    #[test]
    fn test_operator_aliases() {
        for (alias, expected) in [
            ("=", Operator::Eq),
            ("==", Operator::Eq),
            ("<>", Operator::Ne),
            ("!=", Operator::Ne),
            (">=", Operator::Ge),
            ("<", Operator::Lt),
            ("LE", Operator::Le),
        ] {
            assert_eq!(Operator::parse(alias).unwrap(), expected);
        }
        assert!(matches!(
            Operator::parse("like"),
            Err(Error::InvalidOperator { .. })
        ));
    }

    #[test]
    fn test_value_literals() {
        assert_eq!(FilterValue::Null.to_string(), "null");
        assert_eq!(FilterValue::from(true).to_string(), "true");
        assert_eq!(FilterValue::from(2.5).to_string(), "2.5");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(FilterValue::from(date).to_string(), "'2024-03-09'");
        assert_eq!(FilterValue::from(None::<i64>).to_string(), "null");
    }

    #[test]
    fn test_compound_constraints() {
        let wheres = vec![
            Where {
                boolean: Boolean::And,
                constraint: Constraint::In {
                    field: "CardType".into(),
                    values: vec!["cCustomer".into(), "cLid".into()],
                    negated: false,
                },
            },
            Where {
                boolean: Boolean::And,
                constraint: Constraint::Between {
                    field: "DocTotal".into(),
                    low: 100.into(),
                    high: 500.into(),
                },
            },
            Where {
                boolean: Boolean::Or,
                constraint: Constraint::Null {
                    field: "Comments".into(),
                    negated: true,
                },
            },
        ];

        assert_eq!(
            build_filter(&wheres).unwrap(),
            "(CardType eq 'cCustomer' or CardType eq 'cLid') and (DocTotal ge 100 and DocTotal le 500) or Comments ne null"
        );
    }

    #[test]
    fn test_empty_in_lists_render_as_literals() {
        let empty_in = Constraint::In {
            field: "ItemCode".into(),
            values: vec![],
            negated: false,
        };
        assert_eq!(empty_in.render(), "false");
        assert!(empty_in.is_unsatisfiable());

        let empty_not_in = Constraint::In {
            field: "ItemCode".into(),
            values: vec![],
            negated: true,
        };
        assert_eq!(empty_not_in.render(), "true");
        assert!(!empty_not_in.is_unsatisfiable());
    }

    #[test]
    fn test_and_filters() {
        assert_eq!(
            and_filters(Some("A eq 1"), Some("B eq 2")).as_deref(),
            Some("(A eq 1) and (B eq 2)")
        );
        assert_eq!(and_filters(None, Some("B eq 2")).as_deref(), Some("B eq 2"));
        assert_eq!(and_filters(None, None), None);
    }
}
