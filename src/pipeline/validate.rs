//! Validator: check a [`NormalizedRecord`] against its template [`Schema`].
//!
//! Field checks run first, one [`FieldReport`] per declared field. Record
//! checks run afterwards as a separate pass and append [`CheckReport`]s. The
//! record is valid iff nothing reported [`FieldStatus::Error`].

use crate::record::{NormalizedRecord, Value};
use crate::schema::{Constraint, ConstraintKind, FieldSpec, RecordCheck, Schema, Severity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one field or record check. Ordered by badness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Ok,
    Warning,
    Error,
}

impl From<Severity> for FieldStatus {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Warning => FieldStatus::Warning,
            Severity::Error => FieldStatus::Error,
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldStatus::Ok => "ok",
            FieldStatus::Warning => "warning",
            FieldStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReport {
    pub field: String,
    pub status: FieldStatus,
    /// All violation messages joined with `; `. Empty when `ok`.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub check: String,
    pub status: FieldStatus,
    pub message: String,
}

/// Field and record-level results for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub fields: Vec<FieldReport>,
    pub checks: Vec<CheckReport>,
    pub valid: bool,
}

impl ValidationReport {
    fn statuses(&self) -> impl Iterator<Item = FieldStatus> + '_ {
        self.fields
            .iter()
            .map(|f| f.status)
            .chain(self.checks.iter().map(|c| c.status))
    }

    pub fn error_count(&self) -> usize {
        self.statuses().filter(|s| *s == FieldStatus::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.statuses().filter(|s| *s == FieldStatus::Warning).count()
    }

    /// `(subject, status, message)` for every non-ok entry.
    pub fn issues(&self) -> impl Iterator<Item = (&str, FieldStatus, &str)> {
        self.fields
            .iter()
            .map(|f| (f.field.as_str(), f.status, f.message.as_str()))
            .chain(
                self.checks
                    .iter()
                    .map(|c| (c.check.as_str(), c.status, c.message.as_str())),
            )
            .filter(|(_, s, _)| *s != FieldStatus::Ok)
    }
}

/// Stateless schema checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, record: &NormalizedRecord, schema: &Schema) -> ValidationReport {
        let fields: Vec<FieldReport> = schema
            .fields
            .iter()
            .map(|spec| check_field(spec, record))
            .collect();
        let checks: Vec<CheckReport> = schema
            .checks
            .iter()
            .map(|c| run_check(c, record))
            .collect();
        let valid = fields.iter().all(|f| f.status != FieldStatus::Error)
            && checks.iter().all(|c| c.status != FieldStatus::Error);
        ValidationReport {
            fields,
            checks,
            valid,
        }
    }
}

fn check_field(spec: &FieldSpec, record: &NormalizedRecord) -> FieldReport {
    let field = record.field(&spec.name);
    let value = record.value(&spec.name);
    let report = |status, message: String| FieldReport {
        field: spec.name.clone(),
        status,
        message,
    };

    match value {
        Value::Absent if spec.required => {
            return report(FieldStatus::Error, "required field is missing".into())
        }
        Value::Absent => return report(FieldStatus::Ok, String::new()),
        Value::Invalid => {
            let raw = field.and_then(|f| f.raw.as_deref()).unwrap_or_default();
            return report(
                FieldStatus::Error,
                format!("'{raw}' is not a valid {}", spec.field_type),
            );
        }
        v if v.field_type() != Some(spec.field_type) => {
            return report(
                FieldStatus::Error,
                format!(
                    "expected {}, found {}",
                    spec.field_type,
                    v.field_type().map(|t| t.as_str()).unwrap_or("nothing")
                ),
            );
        }
        _ => {}
    }

    let mut status = FieldStatus::Ok;
    let mut messages = Vec::new();
    for c in &spec.constraints {
        if let Some(msg) = violation(c, value) {
            status = status.max(c.severity.into());
            messages.push(msg);
        }
    }
    report(status, messages.join("; "))
}

/// Message for a violated constraint. Constraints that do not apply to the
/// value's type are ignored.
fn violation(c: &Constraint, value: &Value) -> Option<String> {
    match (&c.kind, value) {
        (ConstraintKind::Min(min), v) => {
            let n = v.as_decimal()?;
            (n < *min).then(|| format!("{n} is below the minimum {min}"))
        }
        (ConstraintKind::Max(max), v) => {
            let n = v.as_decimal()?;
            (n > *max).then(|| format!("{n} is above the maximum {max}"))
        }
        (ConstraintKind::Pattern(re), v) => {
            let text = v.canonical()?;
            (!re.is_match(&text)).then(|| format!("'{text}' does not match {}", re.as_str()))
        }
        (ConstraintKind::Length { min, max }, Value::String(s)) => {
            let len = s.chars().count();
            if min.is_some_and(|m| len < m) || max.is_some_and(|m| len > m) {
                Some(format!(
                    "length {len} outside {}..{}",
                    min.map(|m| m.to_string()).unwrap_or_default(),
                    max.map(|m| m.to_string()).unwrap_or_default()
                ))
            } else {
                None
            }
        }
        (ConstraintKind::OneOf(allowed), Value::String(s)) => {
            (!allowed.iter().any(|a| a.eq_ignore_ascii_case(s)))
                .then(|| format!("'{s}' is not one of {}", allowed.join(", ")))
        }
        (ConstraintKind::DateRange { from, to }, Value::Date(d)) => {
            (d < from || d > to).then(|| format!("{d} is outside {from}..{to}"))
        }
        _ => None,
    }
}

fn run_check(check: &RecordCheck, record: &NormalizedRecord) -> CheckReport {
    let name = check.name();
    let (status, message) = match check {
        RecordCheck::SumEquals {
            parts,
            total,
            tolerance,
            severity,
        } => {
            let values: Option<Vec<Decimal>> =
                parts.iter().map(|p| record.value(p).as_decimal()).collect();
            match (values, record.value(total).as_decimal()) {
                (Some(values), Some(expected)) => {
                    let sum = values
                        .iter()
                        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v));
                    match sum.and_then(|s| s.checked_sub(expected).map(|diff| (s, diff))) {
                        Some((_, diff)) if diff.abs() <= *tolerance => {
                            (FieldStatus::Ok, String::new())
                        }
                        Some((sum, _)) => (
                            (*severity).into(),
                            format!("parts sum to {sum} but {total} is {expected}"),
                        ),
                        None => (
                            FieldStatus::Error,
                            format!("{name} overflows the decimal range"),
                        ),
                    }
                }
                _ => (FieldStatus::Ok, "skipped: operand missing or invalid".into()),
            }
        }
        RecordCheck::NotBefore {
            earlier,
            later,
            severity,
        } => match (record.value(earlier), record.value(later)) {
            (Value::Date(a), Value::Date(b)) if a > b => (
                (*severity).into(),
                format!("{earlier} {a} is after {later} {b}"),
            ),
            (Value::Date(_), Value::Date(_)) => (FieldStatus::Ok, String::new()),
            _ => (FieldStatus::Ok, "skipped: operand missing or invalid".into()),
        },
    };
    CheckReport {
        check: name,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NormalizedField;
    use crate::schema::{FieldSpec, FieldType};
    use chrono::NaiveDate;
    use regex::Regex;

    fn field(name: &str, field_type: FieldType, value: Value) -> NormalizedField {
        NormalizedField {
            name: name.into(),
            field_type,
            raw: value.canonical(),
            value,
        }
    }

    fn money(cents: i64) -> Value {
        Value::Decimal(Decimal::new(cents, 2))
    }

    fn invoice_schema() -> Schema {
        Schema {
            fields: vec![
                FieldSpec::new("invoice_id", FieldType::String)
                    .required()
                    .constraint(Constraint::warning(ConstraintKind::Pattern(
                        Regex::new(r"^\d+$").unwrap(),
                    ))),
                FieldSpec::new("subtotal", FieldType::Decimal),
                FieldSpec::new("tax", FieldType::Decimal),
                FieldSpec::new("total", FieldType::Decimal)
                    .required()
                    .constraint(Constraint::error(ConstraintKind::Min(Decimal::ZERO))),
            ],
            checks: vec![RecordCheck::SumEquals {
                parts: vec!["subtotal".into(), "tax".into()],
                total: "total".into(),
                tolerance: Decimal::new(1, 2),
                severity: Severity::Warning,
            }],
        }
    }

    fn invoice(id: Value, subtotal: Value, tax: Value, total: Value) -> NormalizedRecord {
        NormalizedRecord {
            fields: vec![
                field("invoice_id", FieldType::String, id),
                field("subtotal", FieldType::Decimal, subtotal),
                field("tax", FieldType::Decimal, tax),
                field("total", FieldType::Decimal, total),
            ],
        }
    }

    #[test]
    fn clean_record_is_valid() {
        let r = invoice(
            Value::String("12345".into()),
            money(840000),
            money(134400),
            money(974400),
        );
        let report = Validator.validate(&r, &invoice_schema());
        assert!(report.valid);
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.warning_count(), 0);
        assert_eq!(report.checks[0].status, FieldStatus::Ok);
    }

    #[test]
    fn missing_required_field_is_error() {
        let r = invoice(
            Value::String("12345".into()),
            Value::Absent,
            Value::Absent,
            Value::Absent,
        );
        let report = Validator.validate(&r, &invoice_schema());
        assert!(!report.valid);
        let total = report.fields.iter().find(|f| f.field == "total").unwrap();
        assert_eq!(total.status, FieldStatus::Error);
        assert!(total.message.contains("missing"));
        // Absent operands skip the sum check.
        assert_eq!(report.checks[0].status, FieldStatus::Ok);
        assert!(report.checks[0].message.starts_with("skipped"));
    }

    #[test]
    fn sum_mismatch_is_a_warning_only() {
        let r = invoice(
            Value::String("12345".into()),
            money(100),
            money(100),
            money(500),
        );
        let report = Validator.validate(&r, &invoice_schema());
        assert!(report.valid);
        assert_eq!(report.checks[0].status, FieldStatus::Warning);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn overflowing_sum_is_an_error_not_a_panic() {
        let r = invoice(
            Value::String("12345".into()),
            Value::Decimal(Decimal::MAX),
            Value::Decimal(Decimal::MAX),
            money(100),
        );
        let report = Validator.validate(&r, &invoice_schema());
        assert_eq!(report.checks[0].status, FieldStatus::Error);
        assert!(report.checks[0].message.contains("overflows"));
        assert!(!report.valid);
    }

    #[test]
    fn worst_status_wins_and_messages_join() {
        let r = invoice(
            Value::String("INV-1".into()),
            Value::Absent,
            Value::Absent,
            money(-100),
        );
        let report = Validator.validate(&r, &invoice_schema());
        assert!(!report.valid);
        let id = &report.fields[0];
        assert_eq!(id.status, FieldStatus::Warning);
        let total = &report.fields[3];
        assert_eq!(total.status, FieldStatus::Error);
        assert!(total.message.contains("below the minimum"));
        assert_eq!(report.issues().count(), 2);
    }

    #[test]
    fn invalid_and_mismatched_values_are_errors() {
        let mut r = invoice(
            Value::String("1".into()),
            Value::Invalid,
            Value::String("ten".into()),
            money(100),
        );
        r.fields[1].raw = Some("12,34,5".into());
        let report = Validator.validate(&r, &invoice_schema());
        assert_eq!(report.fields[1].status, FieldStatus::Error);
        assert!(report.fields[1].message.contains("12,34,5"));
        assert_eq!(report.fields[2].status, FieldStatus::Error);
        assert!(report.fields[2].message.contains("expected decimal"));
    }

    #[test]
    fn date_checks() {
        let d = |y, m, day| Value::Date(NaiveDate::from_ymd_opt(y, m, day).unwrap());
        let schema = Schema {
            fields: vec![
                FieldSpec::new("date", FieldType::Date).constraint(Constraint::warning(
                    ConstraintKind::DateRange {
                        from: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap(),
                        to: NaiveDate::from_ymd_opt(2100, 12, 31).unwrap(),
                    },
                )),
                FieldSpec::new("due_date", FieldType::Date),
            ],
            checks: vec![RecordCheck::NotBefore {
                earlier: "date".into(),
                later: "due_date".into(),
                severity: Severity::Error,
            }],
        };
        let r = NormalizedRecord {
            fields: vec![
                field("date", FieldType::Date, d(1850, 5, 1)),
                field("due_date", FieldType::Date, d(1849, 1, 1)),
            ],
        };
        let report = Validator.validate(&r, &schema);
        assert_eq!(report.fields[0].status, FieldStatus::Warning);
        assert_eq!(report.checks[0].status, FieldStatus::Error);
        assert!(!report.valid);
    }

    #[test]
    fn one_of_and_length() {
        let schema = Schema {
            fields: vec![FieldSpec::new("currency", FieldType::String)
                .constraint(Constraint::warning(ConstraintKind::OneOf(vec![
                    "USD".into(),
                    "MXN".into(),
                ])))
                .constraint(Constraint::error(ConstraintKind::Length {
                    min: Some(3),
                    max: Some(3),
                }))],
            checks: vec![],
        };
        let ok = NormalizedRecord {
            fields: vec![field("currency", FieldType::String, Value::String("mxn".into()))],
        };
        assert!(Validator.validate(&ok, &schema).issues().next().is_none());

        let bad = NormalizedRecord {
            fields: vec![field("currency", FieldType::String, Value::String("PESO".into()))],
        };
        let report = Validator.validate(&bad, &schema);
        assert_eq!(report.fields[0].status, FieldStatus::Error);
        assert!(report.fields[0].message.contains("; "));
    }
}
