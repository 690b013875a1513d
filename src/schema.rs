//! Field schemas shared by templates, the normalizer and the validator.
//!
//! A [`Schema`] lists the declared fields of a template in order, each with a
//! [`FieldType`], a required flag and constraints, plus record-level
//! [`RecordCheck`]s that span several fields.

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical type a raw value is normalised to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Decimal,
    Integer,
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Date => "date",
            FieldType::Decimal => "decimal",
            FieldType::Integer => "integer",
            FieldType::String => "string",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a violated constraint reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single value-level rule.
#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// Numeric lower bound, inclusive.
    Min(Decimal),
    /// Numeric upper bound, inclusive.
    Max(Decimal),
    /// The canonical text form must match.
    Pattern(Regex),
    /// Character count of string values.
    Length { min: Option<usize>, max: Option<usize> },
    /// Case-insensitive membership for string values.
    OneOf(Vec<String>),
    /// Inclusive date window.
    DateRange { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub severity: Severity,
}

impl Constraint {
    pub fn error(kind: ConstraintKind) -> Self {
        Self {
            kind,
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: ConstraintKind) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            constraints: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn constraint(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }
}

/// A rule spanning several fields, evaluated after every field check.
#[derive(Debug, Clone)]
pub enum RecordCheck {
    /// `sum(parts) == total` within `tolerance`.
    SumEquals {
        parts: Vec<String>,
        total: String,
        tolerance: Decimal,
        severity: Severity,
    },
    /// Date field `earlier` must not fall after date field `later`.
    NotBefore {
        earlier: String,
        later: String,
        severity: Severity,
    },
}

impl RecordCheck {
    /// Stable name used in reports.
    pub fn name(&self) -> String {
        match self {
            RecordCheck::SumEquals { parts, total, .. } => {
                format!("{} = {}", parts.join(" + "), total)
            }
            RecordCheck::NotBefore { earlier, later, .. } => format!("{earlier} <= {later}"),
        }
    }
}

/// Declared fields plus record-level checks.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
    pub checks: Vec<RecordCheck>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_names_are_readable() {
        let c = RecordCheck::SumEquals {
            parts: vec!["subtotal".into(), "tax".into()],
            total: "total".into(),
            tolerance: Decimal::new(1, 2),
            severity: Severity::Warning,
        };
        assert_eq!(c.name(), "subtotal + tax = total");
    }

    #[test]
    fn severity_orders_error_above_warning() {
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn schema_lookup() {
        let s = Schema {
            fields: vec![
                FieldSpec::new("a", FieldType::String).required(),
                FieldSpec::new("b", FieldType::Decimal),
            ],
            checks: vec![],
        };
        assert!(s.field("a").unwrap().required);
        assert_eq!(s.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
