//! Normalizer: raw strings → typed [`Value`]s.
//!
//! Never fails. A value that does not parse as its declared type becomes
//! [`Value::Invalid`] and keeps its raw text for the audit trail; the
//! validator reports it.

use crate::config::{DateOrder, NormalizerConfig, NumberFormat};
use crate::record::{NormalizedField, NormalizedRecord, Record, Value};
use crate::schema::{FieldSpec, FieldType};
use crate::templates::fold;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})(?:[T\s].*)?$").unwrap());

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{2}|\d{4})$").unwrap());

// 15 de marzo de 2024
static SPANISH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})\s+de\s+(\p{L}+)\.?\s+(?:de|del)\s+(\d{4})$").unwrap()
});

// March 15, 2024
static MONTH_FIRST_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\p{L}+)\.?\s+(\d{1,2}),?\s+(\d{4})$").unwrap());

// 15 March 2024
static DAY_FIRST_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})\s+(\p{L}+)\.?,?\s+(\d{4})$").unwrap());

static CURRENCY_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:usd|mxn|eur|cop|ars|clp|gbp|mn|pesos?|dollars?|euros?)\b|[$€£¥]").unwrap()
});

static INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+\-]?(?:\d{1,3}(?:,\d{3})+|\d+)$").unwrap());

/// Two-digit years below this are 20xx, the rest 19xx.
const YEAR_PIVOT: i32 = 70;

/// Converts raw record values into canonical typed values.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalise `record` against `fields`.
    ///
    /// The output has exactly the fields of `fields`, in that order.
    pub fn normalize(&self, record: &Record, fields: &[FieldSpec]) -> NormalizedRecord {
        let fields = fields
            .iter()
            .map(|spec| {
                let raw = record.get(&spec.name);
                NormalizedField {
                    name: spec.name.clone(),
                    field_type: spec.field_type,
                    value: raw
                        .map(|r| self.normalize_value(r, spec.field_type))
                        .unwrap_or(Value::Absent),
                    raw: raw.map(str::to_string),
                }
            })
            .collect();
        NormalizedRecord { fields }
    }

    /// Convert one raw string.
    pub fn normalize_value(&self, raw: &str, field_type: FieldType) -> Value {
        if raw.trim().is_empty() {
            return Value::Absent;
        }
        let parsed = match field_type {
            FieldType::Date => self.parse_date(raw).map(Value::Date),
            FieldType::Decimal => self.parse_decimal(raw).map(Value::Decimal),
            FieldType::Integer => parse_integer(raw).map(Value::Integer),
            FieldType::String => Some(Value::String(clean_string(raw))),
        };
        parsed.unwrap_or(Value::Invalid)
    }

    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let s = raw.trim().trim_end_matches(['.', ',', ';']);

        if let Some(c) = ISO_DATE.captures(s) {
            return ymd(num(&c[1])?, num(&c[2])?, num(&c[3])?);
        }

        if let Some(c) = NUMERIC_DATE.captures(s) {
            let (a, b) = (num(&c[1])?, num(&c[2])?);
            let year = expand_year(&c[3])?;
            let month_first = ymd(year, a, b);
            let day_first = ymd(year, b, a);
            return match (month_first, day_first) {
                (Some(m), Some(d)) => Some(match self.config.date_order {
                    DateOrder::MonthFirst => m,
                    DateOrder::DayFirst => d,
                }),
                (m, d) => m.or(d),
            };
        }

        if let Some(c) = SPANISH_DATE.captures(s) {
            return ymd(num(&c[3])?, month_number(&c[2])?, num(&c[1])?);
        }
        if let Some(c) = MONTH_FIRST_DATE.captures(s) {
            return ymd(num(&c[3])?, month_number(&c[1])?, num(&c[2])?);
        }
        if let Some(c) = DAY_FIRST_DATE.captures(s) {
            return ymd(num(&c[3])?, month_number(&c[2])?, num(&c[1])?);
        }
        None
    }

    pub fn parse_decimal(&self, raw: &str) -> Option<Decimal> {
        let stripped = CURRENCY_TOKENS.replace_all(raw, "");
        let mut s: String = stripped
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'')
            .collect();

        let mut negative = false;
        if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
            negative = true;
            s = s[1..s.len() - 1].to_string();
        }
        if let Some(rest) = s.strip_prefix('-') {
            negative = !negative;
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix('+') {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_suffix('-') {
            negative = !negative;
            s = rest.to_string();
        }

        if s.is_empty()
            || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
            || !s.starts_with(|c: char| c.is_ascii_digit() || c == '.' || c == ',')
            || !s.chars().any(|c| c.is_ascii_digit())
        {
            return None;
        }

        let plain = resolve_separators(&s, self.config.number_format)?;
        let mut value = Decimal::from_str(&plain).ok()?;
        if negative {
            value = -value;
        }
        let scale = self.config.decimal_scale;
        value = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(scale);
        Some(value)
    }
}

fn num<T: FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_year(s: &str) -> Option<i32> {
    let y: i32 = s.parse().ok()?;
    Some(match s.len() {
        2 if y < YEAR_PIVOT => 2000 + y,
        2 => 1900 + y,
        _ => y,
    })
}

fn month_number(name: &str) -> Option<u32> {
    let m = match fold(name).as_str() {
        "january" | "jan" | "enero" | "ene" => 1,
        "february" | "feb" | "febrero" => 2,
        "march" | "mar" | "marzo" => 3,
        "april" | "apr" | "abril" | "abr" => 4,
        "may" | "mayo" => 5,
        "june" | "jun" | "junio" => 6,
        "july" | "jul" | "julio" => 7,
        "august" | "aug" | "agosto" | "ago" => 8,
        "september" | "sep" | "sept" | "septiembre" | "setiembre" | "set" => 9,
        "october" | "oct" | "octubre" => 10,
        "november" | "nov" | "noviembre" => 11,
        "december" | "dec" | "diciembre" | "dic" => 12,
        _ => return None,
    };
    Some(m)
}

/// Reduce `digits[.,]*` to a plain `1234.56` string.
fn resolve_separators(s: &str, format: NumberFormat) -> Option<String> {
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    let (thousands, decimal) = match format {
        NumberFormat::Dot => (',', Some('.')),
        NumberFormat::Comma => ('.', Some(',')),
        NumberFormat::Auto => match (dots, commas) {
            (0, 0) => return Some(s.to_string()),
            (_, 0) => auto_single(s, '.', dots),
            (0, _) => auto_single(s, ',', commas),
            _ => {
                // Both present: the right-most one is the decimal point.
                let last_dot = s.rfind('.')?;
                let last_comma = s.rfind(',')?;
                if last_dot > last_comma {
                    (',', Some('.'))
                } else {
                    ('.', Some(','))
                }
            }
        },
    };

    let mut out = String::with_capacity(s.len());
    let mut seen_decimal = false;
    for c in s.chars() {
        if c == thousands {
            if seen_decimal {
                return None;
            }
        } else if Some(c) == decimal {
            if seen_decimal {
                return None;
            }
            seen_decimal = true;
            out.push('.');
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// One kind of separator only. Repeated, or a lone one followed by exactly
/// three digits after a non-zero integer part, means thousands.
fn auto_single(s: &str, sep: char, count: usize) -> (char, Option<char>) {
    let other = if sep == '.' { ',' } else { '.' };
    if count > 1 {
        return (sep, None);
    }
    let (int_part, frac_part) = s.split_once(sep).unwrap_or((s, ""));
    let grouping = frac_part.len() == 3
        && int_part.len() <= 3
        && !int_part.trim_start_matches('0').is_empty();
    if grouping {
        (sep, None)
    } else {
        (other, Some(sep))
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if !INTEGER.is_match(&s) {
        return None;
    }
    s.replace(',', "").trim_start_matches('+').parse().ok()
}

/// Trim, collapse whitespace runs, fold typographic quotes and dashes.
fn clean_string(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\u{00A0}' => ' ',
            c => c,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n() -> Normalizer {
        Normalizer::default()
    }

    fn day_first() -> Normalizer {
        Normalizer::new(NormalizerConfig {
            date_order: DateOrder::DayFirst,
            ..Default::default()
        })
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn numeric_dates_follow_locale_only_when_ambiguous() {
        assert_eq!(n().parse_date("03/15/2024"), Some(d(2024, 3, 15)));
        assert_eq!(day_first().parse_date("03/15/2024"), Some(d(2024, 3, 15)));
        assert_eq!(day_first().parse_date("15/03/2024"), Some(d(2024, 3, 15)));
        assert_eq!(n().parse_date("03/04/2024"), Some(d(2024, 3, 4)));
        assert_eq!(day_first().parse_date("03/04/2024"), Some(d(2024, 4, 3)));
        assert_eq!(n().parse_date("31.12.2023"), Some(d(2023, 12, 31)));
        assert_eq!(n().parse_date("13/13/2024"), None);
    }

    #[test]
    fn two_digit_years_pivot_at_seventy() {
        assert_eq!(n().parse_date("01-02-24"), Some(d(2024, 1, 2)));
        assert_eq!(n().parse_date("01-02-85"), Some(d(1985, 1, 2)));
    }

    #[test]
    fn iso_and_textual_dates() {
        assert_eq!(n().parse_date("2024-03-15"), Some(d(2024, 3, 15)));
        assert_eq!(n().parse_date("2024/3/5"), Some(d(2024, 3, 5)));
        assert_eq!(n().parse_date("15 de marzo de 2024"), Some(d(2024, 3, 15)));
        assert_eq!(n().parse_date("31 de Diciembre del 2024"), Some(d(2024, 12, 31)));
        assert_eq!(n().parse_date("March 15, 2024"), Some(d(2024, 3, 15)));
        assert_eq!(n().parse_date("Sept. 9 2024"), Some(d(2024, 9, 9)));
        assert_eq!(n().parse_date("15 Mar 2024"), Some(d(2024, 3, 15)));
        assert_eq!(n().parse_date("30 de febrero de 2024"), None);
        assert_eq!(n().parse_date("Smarch 15, 2024"), None);
    }

    #[test]
    fn currency_amounts() {
        assert_eq!(n().parse_decimal("$1,500.00"), Some(dec("1500.00")));
        assert_eq!(n().parse_decimal("USD 1,234.5"), Some(dec("1234.50")));
        assert_eq!(n().parse_decimal("1.234,56 €"), Some(dec("1234.56")));
        assert_eq!(n().parse_decimal("(456,789)"), Some(dec("-456789.00")));
        assert_eq!(n().parse_decimal("-12.345"), Some(dec("-12345.00")));
        assert_eq!(n().parse_decimal("0.125"), Some(dec("0.13")));
        assert_eq!(n().parse_decimal("12,5"), Some(dec("12.50")));
        assert_eq!(n().parse_decimal("1 234 567"), Some(dec("1234567.00")));
        assert_eq!(n().parse_decimal("N/A"), None);
        assert_eq!(n().parse_decimal("1.2.3,4,5"), None);
    }

    #[test]
    fn explicit_number_formats() {
        let comma = Normalizer::new(NormalizerConfig {
            number_format: NumberFormat::Comma,
            ..Default::default()
        });
        assert_eq!(comma.parse_decimal("1.500"), Some(dec("1500.00")));
        assert_eq!(comma.parse_decimal("1.500,7"), Some(dec("1500.70")));

        let dot = Normalizer::new(NormalizerConfig {
            number_format: NumberFormat::Dot,
            decimal_scale: 3,
            ..Default::default()
        });
        assert_eq!(dot.parse_decimal("1,500"), Some(dec("1500.000")));
        assert_eq!(dot.parse_decimal("1.5"), Some(dec("1.500")));
    }

    #[test]
    fn integers_and_strings() {
        assert_eq!(n().normalize_value("1,024", FieldType::Integer), Value::Integer(1024));
        assert_eq!(n().normalize_value("-7", FieldType::Integer), Value::Integer(-7));
        assert_eq!(n().normalize_value("7.5", FieldType::Integer), Value::Invalid);
        assert_eq!(
            n().normalize_value("  \u{201C}ACME\u{201D}   Corp \u{2013} MX ", FieldType::String),
            Value::String("\"ACME\" Corp - MX".into())
        );
    }

    #[test]
    fn record_keeps_declared_fields_in_order() {
        let specs = vec![
            FieldSpec::new("invoice_id", FieldType::String).required(),
            FieldSpec::new("date", FieldType::Date),
            FieldSpec::new("total", FieldType::Decimal),
            FieldSpec::new("tax", FieldType::Decimal),
        ];
        let record = Record::new(vec![
            ("total".into(), Some("$1,500.00".into())),
            ("date".into(), Some("03/15/2024".into())),
            ("invoice_id".into(), Some("12345".into())),
            ("tax".into(), None),
        ]);
        let out = n().normalize(&record, &specs);
        assert_eq!(
            out.names().collect::<Vec<_>>(),
            vec!["invoice_id", "date", "total", "tax"]
        );
        assert_eq!(out.value("date"), &Value::Date(d(2024, 3, 15)));
        assert_eq!(out.value("total").canonical().unwrap(), "1500.00");
        assert_eq!(out.value("tax"), &Value::Absent);
        assert_eq!(out.field("total").unwrap().raw.as_deref(), Some("$1,500.00"));
    }

    #[test]
    fn unparseable_value_is_invalid_with_raw_kept() {
        let specs = vec![FieldSpec::new("date", FieldType::Date)];
        let record = Record::new(vec![("date".into(), Some("soon".into()))]);
        let out = n().normalize(&record, &specs);
        let f = out.field("date").unwrap();
        assert_eq!(f.value, Value::Invalid);
        assert_eq!(f.raw.as_deref(), Some("soon"));
    }
}
