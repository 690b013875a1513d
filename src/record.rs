//! Raw and normalised records.
//!
//! A [`Record`] carries what a template pulled out of a document: one entry
//! per declared field, in declaration order, with `None` for fields that
//! matched nothing. A [`NormalizedRecord`] is the same field list after
//! type conversion.

use crate::schema::FieldType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

/// Raw field values in template declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Option<String>)>) -> Self {
        Self { fields }
    }

    /// Raw value of `name`; `None` if absent or undeclared.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether `name` is declared on this record.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Date(NaiveDate),
    Decimal(Decimal),
    Integer(i64),
    String(String),
    /// The raw value could not be parsed as the declared type.
    Invalid,
    /// The template found nothing for this field.
    Absent,
}

impl Value {
    /// Canonical text form; `None` for absent and invalid values.
    ///
    /// Dates are `YYYY-MM-DD`, decimals keep their scale.
    pub fn canonical(&self) -> Option<String> {
        match self {
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Invalid | Value::Absent => None,
        }
    }

    /// Type this value carries, if any.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Date(_) => Some(FieldType::Date),
            Value::Decimal(_) => Some(FieldType::Decimal),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::String(_) => Some(FieldType::String),
            Value::Invalid | Value::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Numeric view for bound and sum checks.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    /// JSON form: decimals as strings so no precision is lost.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Integer(i) => JsonValue::from(*i),
            other => other
                .canonical()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One normalised field with its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NormalizedField {
    pub name: String,
    pub field_type: FieldType,
    pub value: Value,
    /// The raw string the value came from.
    pub raw: Option<String>,
}

/// Typed record in template declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct NormalizedRecord {
    pub fields: Vec<NormalizedField>,
}

impl NormalizedRecord {
    pub fn field(&self, name: &str) -> Option<&NormalizedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Typed value of `name`; [`Value::Absent`] if undeclared.
    pub fn value(&self, name: &str) -> &Value {
        self.field(name).map(|f| &f.value).unwrap_or(&Value::Absent)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// `{name: value}` object in declaration order.
    pub fn to_json_object(&self) -> Map<String, JsonValue> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.value.to_json()))
            .collect()
    }
}
