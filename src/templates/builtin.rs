//! Built-in templates: financial statements, invoices, tabular reports.
//!
//! Patterns accept English and Spanish labels. Every pattern is compiled once.

use crate::schema::{Constraint, ConstraintKind, FieldSpec, FieldType, RecordCheck, Severity};
use crate::templates::{Detection, FieldSource, RecordShape, TemplateRule};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

/// A date in any of the forms the normalizer understands.
const DATE_VALUE: &str = r"(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}[/.\-]\d{1,2}[/.\-]\d{1,2}|\d{1,2}\s+de\s+\p{L}+\.?\s+(?:de|del)\s+\d{4}|\p{L}{3,}\.?\s+\d{1,2},?\s+\d{4}|\d{1,2}\s+\p{L}{3,}\.?,?\s+\d{4})";

/// An amount with optional currency code or symbol, kept raw.
const AMOUNT_VALUE: &str = r"((?-i:[A-Z]{3})?\s*[$€£]?\s*\(?-?\d[\d.,]*\d\)?|\d)";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

// ── Invoice ──────────────────────────────────────────────────────────────

static INVOICE_ID: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:invoice|factura|folio|bill)\s*(?:no\.?|number|num(?:ero|\.)?|n[o°º]\.?|#)?\s*[:#]?\s*((?:[A-Z][A-Z0-9\-/]*)?\d[A-Z0-9\-/]*)")
});

static INVOICE_DATE_LINE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?im)^\s*(?:invoice\s+date|issue\s+date|date|fecha(?:\s+de\s+(?:emisi[oó]n|expedici[oó]n|factura))?)\s*[:.]?\s*{DATE_VALUE}"
    ))
});

static INVOICE_DATE_ANY: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:invoice\s+date|issue\s+date|fecha\s+de\s+emisi[oó]n|date|fecha)\s*[:.]?\s*{DATE_VALUE}"
    ))
});

static DUE_DATE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:due\s+date|payment\s+due|fecha\s+de\s+vencimiento|fecha\s+l[ií]mite(?:\s+de\s+pago)?|vencimiento)\s*[:.]?\s*{DATE_VALUE}"
    ))
});

static VENDOR: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^\s*(?:vendor|supplier|seller|from|proveedor|emisor|raz[oó]n\s+social|vendido\s+por)\s*[:.]\s*(.+?)\s*$")
});

static CLIENT: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^\s*(?:bill\s+to|sold\s+to|customer|client|cliente|receptor|facturar\s+a)\s*[:.]\s*(.+?)\s*$")
});

static TAX_ID: Lazy<Regex> = Lazy::new(|| {
    re(r"\b(?i:rfc|nif|cif|ruc|rut|cuit|tax\s*id|vat\s*(?:no|number|id)?)\s*(?i:emisor|proveedor)?\s*[:.#]?\s*([A-Z0-9][A-Z0-9\-]{5,})")
});

static SUBTOTAL: Lazy<Regex> = Lazy::new(|| {
    re(&format!(r"(?im)^\s*sub\s*-?\s*total\b\s*[:.]?\s*{AMOUNT_VALUE}"))
});

static TAX: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?im)^\s*(?:iva|tax|vat|impuesto|sales\s+tax)\b(?:\s*\(?\s*\d+(?:[.,]\d+)?\s*%\s*\)?)?\s*[:.]?\s*{AMOUNT_VALUE}"
    ))
});

static TOTAL: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?im)^\s*(?:grand\s+total|total\s+a\s+pagar|total\s+due|amount\s+due|importe\s+total|total\s+general|total)\b\s*(?:\(?(?-i:[A-Z]{{3}})\)?)?\s*[:.]?\s*{AMOUNT_VALUE}"
    ))
});

static CURRENCY: Lazy<Regex> = Lazy::new(|| re(r"\b(MXN|USD|EUR|COP|ARS|CLP|GBP)\b"));

fn year_window() -> ConstraintKind {
    ConstraintKind::DateRange {
        from: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default(),
        to: NaiveDate::from_ymd_opt(2100, 12, 31).unwrap_or_default(),
    }
}

fn non_negative() -> Constraint {
    Constraint::error(ConstraintKind::Min(Decimal::ZERO))
}

/// One record per invoice.
pub fn invoice() -> TemplateRule {
    TemplateRule::builder("invoice")
        .description("Invoices and bills: one record per document")
        .detection(Detection::keywords(
            &[
                "invoice", "factura", "bill to", "rfc", "iva", "subtotal", "amount due",
                "total a pagar", "vendor", "proveedor", "invoice no", "folio",
            ],
            2,
        ))
        .shape(RecordShape::Document)
        .field(
            FieldSpec::new("invoice_id", FieldType::String)
                .required()
                .constraint(Constraint::warning(ConstraintKind::Pattern(re(
                    r"^[A-Za-z0-9][A-Za-z0-9\-/]*$",
                ))))
                .constraint(Constraint::warning(ConstraintKind::Length {
                    min: None,
                    max: Some(40),
                })),
            vec![
                FieldSource::Text(INVOICE_ID.clone()),
                FieldSource::key_value(&["invoice no", "invoice number", "numero de factura", "folio"]),
            ],
        )
        .field(
            FieldSpec::new("date", FieldType::Date)
                .required()
                .constraint(Constraint::warning(year_window())),
            vec![
                FieldSource::Text(INVOICE_DATE_LINE.clone()),
                FieldSource::Text(INVOICE_DATE_ANY.clone()),
                FieldSource::key_value(&["date", "invoice date", "fecha", "fecha de emision"]),
            ],
        )
        .field(
            FieldSpec::new("due_date", FieldType::Date).constraint(Constraint::warning(year_window())),
            vec![
                FieldSource::Text(DUE_DATE.clone()),
                FieldSource::key_value(&["due date", "fecha de vencimiento"]),
            ],
        )
        .field(
            FieldSpec::new("vendor", FieldType::String).constraint(Constraint::warning(
                ConstraintKind::Length {
                    min: Some(2),
                    max: Some(200),
                },
            )),
            vec![
                FieldSource::Text(VENDOR.clone()),
                FieldSource::key_value(&["vendor", "supplier", "proveedor", "emisor"]),
            ],
        )
        .field(
            FieldSpec::new("client", FieldType::String),
            vec![
                FieldSource::Text(CLIENT.clone()),
                FieldSource::key_value(&["bill to", "customer", "cliente"]),
            ],
        )
        .field(
            FieldSpec::new("tax_id", FieldType::String).constraint(Constraint::warning(
                ConstraintKind::Pattern(re(r"^[A-Z0-9\-]{6,20}$")),
            )),
            vec![FieldSource::Text(TAX_ID.clone())],
        )
        .field(
            FieldSpec::new("subtotal", FieldType::Decimal).constraint(non_negative()),
            vec![
                FieldSource::Text(SUBTOTAL.clone()),
                FieldSource::key_value(&["subtotal", "sub total"]),
            ],
        )
        .field(
            FieldSpec::new("tax", FieldType::Decimal).constraint(non_negative()),
            vec![
                FieldSource::Text(TAX.clone()),
                FieldSource::key_value(&["tax", "iva", "vat"]),
            ],
        )
        .field(
            FieldSpec::new("total", FieldType::Decimal)
                .required()
                .constraint(non_negative()),
            vec![
                FieldSource::Text(TOTAL.clone()),
                FieldSource::key_value(&["total", "total a pagar", "amount due", "grand total"]),
            ],
        )
        .field(
            FieldSpec::new("currency", FieldType::String).constraint(Constraint::warning(
                ConstraintKind::OneOf(
                    ["MXN", "USD", "EUR", "COP", "ARS", "CLP", "GBP"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
            )),
            vec![FieldSource::Text(CURRENCY.clone())],
        )
        .check(RecordCheck::SumEquals {
            parts: vec!["subtotal".into(), "tax".into()],
            total: "total".into(),
            tolerance: Decimal::new(1, 2),
            severity: Severity::Warning,
        })
        .check(RecordCheck::NotBefore {
            earlier: "date".into(),
            later: "due_date".into(),
            severity: Severity::Warning,
        })
        .build()
}

// ── Financial report ─────────────────────────────────────────────────────

static COMPANY: Lazy<Regex> = Lazy::new(|| {
    re(r"(?m)^\s*([A-Z][A-Za-z&.,\s]+?(?:S\.A\.B\.(?:\s+de\s+C\.V\.)?|S\.A\.(?:\s+de\s+C\.V\.)?|Inc\.|Corp\.|LLC|Ltd\.))\s*$")
});

static REPORT_DATE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(r"(?i)\b(?:al|as\s+of|at)\s+{DATE_VALUE}"))
});

static CURRENCY_UNIT: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:cifras\s+(?:expresadas\s+)?en|amounts?\s+in|expressed\s+in)\s+(miles\s+de\s+pesos|millones\s+de\s+pesos|millones|miles|thousands|millions)")
});

/// One record per financial statement line.
pub fn financial_report() -> TemplateRule {
    TemplateRule::builder("financial_report")
        .description("Balance sheets, income and cash-flow statements: one record per line item")
        .detection(Detection::keywords(
            &[
                "estados financieros", "financial statements", "balance general", "balance sheet",
                "estado de resultados", "income statement", "estado de situación",
                "estado de situacion", "patrimonio", "stockholders equity", "activo", "pasivo",
                "assets", "liabilities", "flujo de efectivo", "cash flow",
            ],
            3,
        ))
        .shape(RecordShape::TableRows {
            skip_summary_rows: false,
        })
        .field(
            FieldSpec::new("line_item", FieldType::String)
                .required()
                .constraint(Constraint::warning(ConstraintKind::Pattern(re(r"\p{L}")))),
            vec![FieldSource::ColumnIndex(0)],
        )
        .field(
            FieldSpec::new("current_period", FieldType::Decimal),
            vec![FieldSource::ColumnIndex(1)],
        )
        .field(
            FieldSpec::new("prior_period", FieldType::Decimal),
            vec![FieldSource::ColumnIndex(2)],
        )
        .field(
            FieldSpec::new("company", FieldType::String),
            vec![FieldSource::Text(COMPANY.clone())],
        )
        .field(
            FieldSpec::new("report_date", FieldType::Date).constraint(Constraint::warning(year_window())),
            vec![FieldSource::Text(REPORT_DATE.clone())],
        )
        .field(
            FieldSpec::new("currency_unit", FieldType::String),
            vec![FieldSource::Text(CURRENCY_UNIT.clone())],
        )
        .build()
}

// ── Tabular report ───────────────────────────────────────────────────────

static REPORT_TITLE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^\s*((?:reporte|report|informe|listado)\b.*?)\s*$")
});

static PERIOD: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)\b(?:periodo|período|period)\s*[:.]\s*(.+?)\s*$")
});

/// One record per table row.
pub fn report() -> TemplateRule {
    TemplateRule::builder("report")
        .description("Tabular reports: one record per data row, summary rows skipped")
        .detection(Detection::AnyOf(vec![
            Detection::keywords(
                &["reporte", "report", "informe", "listado", "periodo", "period", "resumen", "summary"],
                1,
            ),
            Detection::HasTables,
        ]))
        .shape(RecordShape::TableRows {
            skip_summary_rows: true,
        })
        .field(
            FieldSpec::new("reference", FieldType::String),
            vec![FieldSource::column(&[
                "id", "ref", "reference", "referencia", "codigo", "code", "folio", "no", "num",
                "numero", "clave",
            ])],
        )
        .field(
            FieldSpec::new("description", FieldType::String),
            vec![FieldSource::column(&[
                "descripcion", "description", "concepto", "concept", "nombre", "name", "vendedor",
                "seller", "producto", "product", "item", "articulo", "cliente", "customer",
            ])],
        )
        .field(
            FieldSpec::new("category", FieldType::String),
            vec![FieldSource::column(&[
                "region", "zona", "zone", "categoria", "category", "departamento", "department",
                "area", "tipo", "type",
            ])],
        )
        .field(
            FieldSpec::new("date", FieldType::Date).constraint(Constraint::warning(year_window())),
            vec![FieldSource::column(&["fecha", "date"])],
        )
        .field(
            FieldSpec::new("quantity", FieldType::Integer)
                .constraint(Constraint::warning(ConstraintKind::Min(Decimal::ZERO))),
            vec![FieldSource::column(&["cantidad", "qty", "quantity", "unidades", "units"])],
        )
        .field(
            FieldSpec::new("amount", FieldType::Decimal),
            vec![FieldSource::column(&[
                "ventas", "sales", "importe", "monto", "amount", "total", "valor", "value",
                "precio", "price",
            ])],
        )
        .field(
            FieldSpec::new("secondary_amount", FieldType::Decimal),
            vec![FieldSource::column(&[
                "comision", "commission", "iva", "tax", "descuento", "discount", "fee",
            ])],
        )
        .field(
            FieldSpec::new("report_title", FieldType::String),
            vec![FieldSource::Text(REPORT_TITLE.clone())],
        )
        .field(
            FieldSpec::new("period", FieldType::String),
            vec![FieldSource::Text(PERIOD.clone())],
        )
        .build()
}
