//! Template parser registry.
//!
//! A [`TemplateRule`] is data: how to recognise a document type
//! ([`Detection`]), where each declared field comes from ([`FieldSource`]),
//! whether the document yields one record or one per table row
//! ([`RecordShape`]), and the validation [`Schema`]. New document types are
//! added by registering another rule, not by writing a parser.
//!
//! Resolution order:
//!
//! ```text
//! explicit id  → lookup, unknown id → ParserError::UnknownParser
//! none/"auto"  → first rule (in registration order) whose detection matches
//!              → none matched → ParserError::NoMatchingParser
//! ```

pub mod builtin;

use crate::error::ParserError;
use crate::pipeline::extract::{ExtractionResult, Table};
use crate::record::Record;
use crate::schema::{FieldSpec, RecordCheck, Schema};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// How a rule recognises its document type.
#[derive(Debug, Clone)]
pub enum Detection {
    /// At least `min_matches` distinct keywords occur (case-insensitive).
    Keywords {
        keywords: Vec<String>,
        min_matches: usize,
    },
    /// The regex matches the lowercased full text.
    Pattern(Regex),
    /// Extraction found at least one table.
    HasTables,
    /// Any of the nested heuristics matches.
    AnyOf(Vec<Detection>),
}

impl Detection {
    pub fn keywords(keywords: &[&str], min_matches: usize) -> Self {
        Detection::Keywords {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            min_matches,
        }
    }

    /// `lower_text` must already be lowercased.
    fn matches(&self, lower_text: &str, extraction: &ExtractionResult) -> bool {
        match self {
            Detection::Keywords {
                keywords,
                min_matches,
            } => {
                let hits = keywords
                    .iter()
                    .filter(|k| lower_text.contains(k.as_str()))
                    .count();
                hits >= *min_matches
            }
            Detection::Pattern(re) => re.is_match(lower_text),
            Detection::HasTables => !extraction.tables.is_empty(),
            Detection::AnyOf(all) => all.iter().any(|d| d.matches(lower_text, extraction)),
        }
    }
}

/// Where a field's raw value comes from.
#[derive(Debug, Clone)]
pub enum FieldSource {
    /// First non-empty capture group of the regex over the full text.
    Text(Regex),
    /// In any table, the cell right of a cell whose label matches.
    KeyValue { labels: Vec<String> },
    /// A specific cell: table index, row index (header included), column.
    TableCell { table: usize, row: usize, column: usize },
    /// Column whose header matches one of the aliases.
    Column { aliases: Vec<String> },
    /// Fixed column position.
    ColumnIndex(usize),
}

impl FieldSource {
    pub fn text(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(FieldSource::Text)
    }

    pub fn key_value(labels: &[&str]) -> Self {
        FieldSource::KeyValue {
            labels: labels.iter().map(|l| fold(l)).collect(),
        }
    }

    pub fn column(aliases: &[&str]) -> Self {
        FieldSource::Column {
            aliases: aliases.iter().map(|a| fold(a)).collect(),
        }
    }

    /// Sources whose value is per table row rather than per document.
    fn is_row_level(&self) -> bool {
        matches!(self, FieldSource::Column { .. } | FieldSource::ColumnIndex(_))
    }
}

/// How many records a document yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// Exactly one record per document.
    Document,
    /// One record per table data row.
    TableRows { skip_summary_rows: bool },
}

/// A field with its sources in priority order.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub sources: Vec<FieldSource>,
}

/// Declarative mapping from a document type to fields and schema.
#[derive(Debug, Clone)]
pub struct TemplateRule {
    pub id: String,
    pub description: String,
    pub detection: Detection,
    pub shape: RecordShape,
    fields: Vec<FieldRule>,
    schema: Schema,
}

impl TemplateRule {
    pub fn builder(id: impl Into<String>) -> TemplateRuleBuilder {
        TemplateRuleBuilder {
            rule: TemplateRule {
                id: id.into(),
                description: String::new(),
                detection: Detection::AnyOf(Vec::new()),
                shape: RecordShape::Document,
                fields: Vec::new(),
                schema: Schema::default(),
            },
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    /// Whether the detection heuristic accepts this extraction.
    pub fn detects(&self, extraction: &ExtractionResult) -> bool {
        let lower = extraction.full_text().to_lowercase();
        self.detection.matches(&lower, extraction)
    }

    /// Pull raw values for every declared field.
    ///
    /// `Document` rules always return exactly one record. `TableRows` rules
    /// return one record per data row, possibly none. Unmatched fields are
    /// present as `None`.
    pub fn apply(&self, extraction: &ExtractionResult) -> Vec<Record> {
        let text = extraction.full_text();
        match self.shape {
            RecordShape::Document => {
                let values = self
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), document_value(&f.sources, &text, &extraction.tables)))
                    .collect();
                vec![Record::new(values)]
            }
            RecordShape::TableRows { skip_summary_rows } => {
                self.apply_rows(&text, &extraction.tables, skip_summary_rows)
            }
        }
    }

    fn apply_rows(&self, text: &str, tables: &[Table], skip_summary_rows: bool) -> Vec<Record> {
        // Document-level values repeat on every row.
        let doc_values: Vec<Option<String>> = self
            .fields
            .iter()
            .map(|f| {
                let sources: Vec<FieldSource> = f
                    .sources
                    .iter()
                    .filter(|s| !s.is_row_level())
                    .cloned()
                    .collect();
                document_value(&sources, text, tables)
            })
            .collect();

        let mut records = Vec::new();
        for (t_idx, table) in tables.iter().enumerate() {
            let has_header = looks_like_header(table);
            let header: Option<Vec<String>> = if has_header {
                table.header().map(|h| h.iter().map(|c| fold(c)).collect())
            } else {
                None
            };
            let columns: Vec<Option<usize>> = self
                .fields
                .iter()
                .map(|f| row_column(&f.sources, header.as_deref(), table.column_count()))
                .collect();
            if columns.iter().all(Option::is_none) {
                debug!("{}: table {} has no matching columns", self.id, t_idx);
                continue;
            }

            let rows: &[Vec<String>] = if has_header {
                table.data_rows()
            } else {
                &table.rows
            };
            for row in rows {
                if skip_summary_rows && is_summary_row(row) {
                    continue;
                }
                let row_values: Vec<Option<String>> = columns
                    .iter()
                    .map(|c| c.and_then(|i| row.get(i)).and_then(|v| non_empty(v)))
                    .collect();
                if row_values.iter().all(Option::is_none) {
                    continue;
                }
                let values = self
                    .fields
                    .iter()
                    .zip(row_values)
                    .zip(&doc_values)
                    .map(|((f, row_v), doc_v)| (f.name.clone(), row_v.or_else(|| doc_v.clone())))
                    .collect();
                records.push(Record::new(values));
            }
        }
        records
    }
}

/// Builder for [`TemplateRule`].
#[derive(Debug)]
pub struct TemplateRuleBuilder {
    rule: TemplateRule,
}

impl TemplateRuleBuilder {
    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.rule.description = d.into();
        self
    }

    pub fn detection(mut self, d: Detection) -> Self {
        self.rule.detection = d;
        self
    }

    pub fn shape(mut self, shape: RecordShape) -> Self {
        self.rule.shape = shape;
        self
    }

    /// Declare a field: its schema entry and where to look for it.
    pub fn field(mut self, spec: FieldSpec, sources: Vec<FieldSource>) -> Self {
        self.rule.fields.push(FieldRule {
            name: spec.name.clone(),
            sources,
        });
        self.rule.schema.fields.push(spec);
        self
    }

    pub fn check(mut self, check: RecordCheck) -> Self {
        self.rule.schema.checks.push(check);
        self
    }

    pub fn build(self) -> TemplateRule {
        self.rule
    }
}

// ── Value lookup ─────────────────────────────────────────────────────────

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn document_value(sources: &[FieldSource], text: &str, tables: &[Table]) -> Option<String> {
    sources.iter().find_map(|s| source_value(s, text, tables))
}

fn source_value(source: &FieldSource, text: &str, tables: &[Table]) -> Option<String> {
    match source {
        FieldSource::Text(re) => re.captures_iter(text).find_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .find_map(|m| non_empty(m.as_str()))
        }),
        FieldSource::KeyValue { labels } => tables.iter().find_map(|t| {
            t.rows.iter().find_map(|row| {
                row.iter().enumerate().find_map(|(i, cell)| {
                    let label = fold(cell);
                    if labels.iter().any(|l| !l.is_empty() && label == *l) {
                        row.get(i + 1).and_then(|v| non_empty(v))
                    } else {
                        None
                    }
                })
            })
        }),
        FieldSource::TableCell { table, row, column } => tables
            .get(*table)
            .and_then(|t| t.rows.get(*row))
            .and_then(|r| r.get(*column))
            .and_then(|v| non_empty(v)),
        FieldSource::Column { aliases } => tables.iter().find_map(|t| {
            let header: Vec<String> = t.header()?.iter().map(|c| fold(c)).collect();
            let idx = header_index(&header, aliases)?;
            t.data_rows()
                .iter()
                .find_map(|r| r.get(idx).and_then(|v| non_empty(v)))
        }),
        FieldSource::ColumnIndex(idx) => tables.iter().find_map(|t| {
            let rows = if looks_like_header(t) {
                t.data_rows()
            } else {
                &t.rows[..]
            };
            rows.iter().find_map(|r| r.get(*idx).and_then(|v| non_empty(v)))
        }),
    }
}

/// Column a row-level field reads from in this table.
fn row_column(sources: &[FieldSource], header: Option<&[String]>, width: usize) -> Option<usize> {
    sources.iter().find_map(|s| match s {
        FieldSource::Column { aliases } => header.and_then(|h| header_index(h, aliases)),
        FieldSource::ColumnIndex(i) if *i < width => Some(*i),
        _ => None,
    })
}

fn header_index(header: &[String], aliases: &[String]) -> Option<usize> {
    // Exact matches win over word matches.
    aliases
        .iter()
        .find_map(|a| header.iter().position(|h| h == a))
        .or_else(|| {
            aliases.iter().find_map(|a| {
                let needle = format!(" {a} ");
                header
                    .iter()
                    .position(|h| format!(" {h} ").contains(&needle))
            })
        })
}

static AMOUNT_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[(\-]?\s*(?:[$€£]|[A-Z]{3})?\s*\d{1,3}(?:[.,\s]\d{3})*(?:[.,]\d+)?\s*\)?$").unwrap()
});

/// The first row is a header unless one of its cells reads as an amount.
fn looks_like_header(table: &Table) -> bool {
    match table.header() {
        Some(first) if table.rows.len() > 1 => {
            !first.iter().any(|c| AMOUNT_LIKE.is_match(c.trim()))
        }
        _ => false,
    }
}

const SUMMARY_PREFIXES: &[&str] = &["total", "subtotal", "sub total", "gran total", "grand total", "suma"];

fn is_summary_row(row: &[String]) -> bool {
    row.iter()
        .find(|c| !c.trim().is_empty())
        .map(|c| {
            let f = fold(c);
            SUMMARY_PREFIXES.iter().any(|p| f.starts_with(p))
        })
        .unwrap_or(false)
}

/// Lowercase, strip Spanish accents, turn punctuation into single spaces.
pub(crate) fn fold(s: &str) -> String {
    let mapped: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Ordered set of template rules.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    rules: Vec<TemplateRule>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl TemplateRegistry {
    /// A registry with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// `financial_report`, `invoice`, `report`, in that detection order.
    pub fn with_builtin() -> Self {
        let mut r = Self::empty();
        r.register(builtin::financial_report());
        r.register(builtin::invoice());
        r.register(builtin::report());
        r
    }

    /// Append a rule; a rule with the same id is replaced in place.
    pub fn register(&mut self, rule: TemplateRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn get(&self, id: &str) -> Option<&TemplateRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn rules(&self) -> &[TemplateRule] {
        &self.rules
    }

    /// Pick the rule for a document.
    pub fn resolve(
        &self,
        id: Option<&str>,
        extraction: &ExtractionResult,
    ) -> Result<&TemplateRule, ParserError> {
        match id.map(str::trim).filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("auto")) {
            Some(id) => self.get(id).ok_or_else(|| ParserError::UnknownParser {
                id: id.to_string(),
                available: self.ids().into_iter().map(String::from).collect(),
            }),
            None => {
                let lower = extraction.full_text().to_lowercase();
                self.rules
                    .iter()
                    .find(|r| r.detection.matches(&lower, extraction))
                    .ok_or(ParserError::NoMatchingParser)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::ExtractionStrategy;
    use crate::schema::FieldType;

    fn extraction(text: &str) -> ExtractionResult {
        ExtractionResult::from_page_texts(ExtractionStrategy::Text, &[text.to_string()])
    }

    fn with_table(text: &str, rows: &[&[&str]]) -> ExtractionResult {
        let mut r = extraction(text);
        r.tables.push(Table {
            page: 1,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        });
        r.strategy = ExtractionStrategy::Table;
        r
    }

    fn simple_rule() -> TemplateRule {
        TemplateRule::builder("simple")
            .detection(Detection::keywords(&["widget"], 1))
            .field(
                FieldSpec::new("code", FieldType::String).required(),
                vec![FieldSource::text(r"(?i)code:\s*(\S+)").unwrap()],
            )
            .field(
                FieldSpec::new("amount", FieldType::Decimal),
                vec![FieldSource::text(r"(?i)amount:\s*(\S+)").unwrap()],
            )
            .build()
    }

    #[test]
    fn document_shape_yields_one_record_with_absent_fields() {
        let records = simple_rule().apply(&extraction("Widget order\nCode: W-9"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("code"), Some("W-9"));
        assert!(records[0].contains("amount"));
        assert_eq!(records[0].get("amount"), None);
    }

    #[test]
    fn resolve_explicit_unknown_and_auto() {
        let mut reg = TemplateRegistry::empty();
        reg.register(simple_rule());
        let ex = extraction("a widget");

        assert_eq!(reg.resolve(Some("simple"), &ex).unwrap().id, "simple");
        assert_eq!(reg.resolve(Some("auto"), &ex).unwrap().id, "simple");
        assert!(matches!(
            reg.resolve(Some("missing"), &ex),
            Err(ParserError::UnknownParser { .. })
        ));
        assert_eq!(
            reg.resolve(None, &extraction("nothing relevant")).unwrap_err(),
            ParserError::NoMatchingParser
        );
    }

    #[test]
    fn first_registered_match_wins() {
        let mut reg = TemplateRegistry::empty();
        reg.register(
            TemplateRule::builder("first")
                .detection(Detection::keywords(&["shared"], 1))
                .build(),
        );
        reg.register(
            TemplateRule::builder("second")
                .detection(Detection::keywords(&["shared"], 1))
                .build(),
        );
        assert_eq!(reg.resolve(None, &extraction("shared")).unwrap().id, "first");
    }

    #[test]
    fn register_replaces_same_id() {
        let mut reg = TemplateRegistry::empty();
        reg.register(simple_rule());
        reg.register(
            TemplateRule::builder("simple")
                .description("replacement")
                .build(),
        );
        assert_eq!(reg.ids(), vec!["simple"]);
        assert_eq!(reg.get("simple").unwrap().description, "replacement");
    }

    #[test]
    fn table_rows_use_header_aliases_and_skip_summaries() {
        let rule = TemplateRule::builder("rows")
            .shape(RecordShape::TableRows {
                skip_summary_rows: true,
            })
            .field(
                FieldSpec::new("name", FieldType::String),
                vec![FieldSource::column(&["vendedor", "name"])],
            )
            .field(
                FieldSpec::new("amount", FieldType::Decimal),
                vec![FieldSource::column(&["ventas", "amount"])],
            )
            .field(
                FieldSpec::new("period", FieldType::String),
                vec![FieldSource::text(r"(?im)^periodo:\s*(.+)$").unwrap()],
            )
            .build();
        let ex = with_table(
            "Periodo: Enero 2024",
            &[
                &["ID", "Vendedor", "Ventas"],
                &["001", "Juan", "$45,000.00"],
                &["002", "María", "$38,500.00"],
                &["Total", "", "$83,500.00"],
            ],
        );
        let records = rule.apply(&ex);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some("Juan"));
        assert_eq!(records[1].get("amount"), Some("$38,500.00"));
        assert_eq!(records[1].get("period"), Some("Enero 2024"));
    }

    #[test]
    fn numeric_first_row_is_data() {
        let t = Table {
            page: 1,
            rows: vec![
                vec!["Cash".into(), "1,200.00".into()],
                vec!["Receivables".into(), "800.00".into()],
            ],
        };
        assert!(!looks_like_header(&t));
    }

    #[test]
    fn key_value_reads_cell_after_label() {
        let rule = TemplateRule::builder("kv")
            .field(
                FieldSpec::new("invoice_id", FieldType::String),
                vec![FieldSource::key_value(&["invoice number", "numero de factura"])],
            )
            .build();
        let ex = with_table(
            "",
            &[&["Número de Factura:", "INV-7"], &["Fecha:", "2024-01-02"]],
        );
        assert_eq!(rule.apply(&ex)[0].get("invoice_id"), Some("INV-7"));
    }

    #[test]
    fn table_cell_source() {
        let rule = TemplateRule::builder("cell")
            .field(
                FieldSpec::new("x", FieldType::String),
                vec![FieldSource::TableCell {
                    table: 0,
                    row: 1,
                    column: 1,
                }],
            )
            .build();
        let ex = with_table("", &[&["a", "b"], &["c", "d"]]);
        assert_eq!(rule.apply(&ex)[0].get("x"), Some("d"));
    }

    #[test]
    fn fold_strips_accents_and_punctuation() {
        assert_eq!(fold("  Número de Factura: "), "numero de factura");
        assert_eq!(fold("Descripción"), "descripcion");
    }
}
