//! Excel workbook sink.
//!
//! One worksheet with a styled, frozen header row and an autofilter.
//! Cells keep their types: decimals and integers are numbers, dates are
//! Excel dates shown as `yyyy-mm-dd`, absent and invalid values stay blank.

use super::{artifact_stem, header, write_artifact, Sink};
use crate::config::{ExportConfig, OutputFormat};
use crate::error::{ExportError, Pdf2SheetError};
use crate::output::WriteResult;
use crate::record::{NormalizedRecord, Value};
use async_trait::async_trait;
use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{
    Color, ExcelDateTime, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError,
};
use std::path::Path;
use tracing::info;

/// Longest worksheet name Excel accepts.
const MAX_SHEET_NAME: usize = 31;

#[derive(Debug, Clone)]
pub struct XlsxSink {
    sheet_name: String,
}

impl Default for XlsxSink {
    fn default() -> Self {
        Self {
            sheet_name: "Data".into(),
        }
    }
}

impl XlsxSink {
    pub fn new(config: &ExportConfig) -> Result<Self, Pdf2SheetError> {
        let name = config.xlsx_sheet_name.trim();
        let bad = name.is_empty()
            || name.chars().count() > MAX_SHEET_NAME
            || name.contains(['[', ']', ':', '*', '?', '/', '\\'])
            || name.starts_with('\'')
            || name.ends_with('\'');
        if bad {
            return Err(Pdf2SheetError::InvalidConfig(format!(
                "'{}' is not a valid worksheet name (1-{MAX_SHEET_NAME} characters, none of []:*?/\\)",
                config.xlsx_sheet_name
            )));
        }
        Ok(Self {
            sheet_name: name.to_string(),
        })
    }

    pub fn encode(&self, records: &[NormalizedRecord]) -> Result<Vec<u8>, ExportError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(&self.sheet_name)?;

        let border = Color::RGB(0xD9D9D9);
        let head = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(0x4472C4))
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin)
            .set_border_color(border);
        let cell = Format::new()
            .set_border(FormatBorder::Thin)
            .set_border_color(border);

        let columns = header(records);
        if columns.is_empty() {
            return Ok(workbook.save_to_buffer()?);
        }
        for (c, name) in columns.iter().enumerate() {
            sheet.write_string_with_format(0, col(c)?, name, &head)?;
        }

        for (r, record) in records.iter().enumerate() {
            let r = row(r + 1)?;
            for (c, field) in record.fields.iter().enumerate() {
                write_value(sheet, r, col(c)?, &field.value, &cell)?;
            }
        }

        let last_row = row(records.len())?;
        let last_col = col(columns.len() - 1)?;
        sheet.autofilter(0, 0, last_row, last_col)?;
        sheet.set_freeze_panes(1, 0)?;
        sheet.autofit();

        Ok(workbook.save_to_buffer()?)
    }
}

fn row(i: usize) -> Result<u32, XlsxError> {
    u32::try_from(i).map_err(|_| XlsxError::RowColumnLimitError)
}

fn col(i: usize) -> Result<u16, XlsxError> {
    u16::try_from(i).map_err(|_| XlsxError::RowColumnLimitError)
}

fn write_value(
    sheet: &mut Worksheet,
    r: u32,
    c: u16,
    value: &Value,
    cell: &Format,
) -> Result<(), XlsxError> {
    match value {
        Value::Decimal(d) => match d.to_f64() {
            Some(n) => {
                let fmt = cell.clone().set_num_format(number_format(d.scale()));
                sheet.write_number_with_format(r, c, n, &fmt)?;
            }
            None => {
                sheet.write_string_with_format(r, c, d.to_string(), cell)?;
            }
        },
        Value::Integer(i) => {
            sheet.write_number_with_format(r, c, *i as f64, cell)?;
        }
        Value::Date(d) => {
            // Excel dates start in 1900; earlier dates are kept as text.
            let date = u16::try_from(d.year())
                .ok()
                .and_then(|y| ExcelDateTime::from_ymd(y, d.month() as u8, d.day() as u8).ok());
            match date {
                Some(date) => {
                    let fmt = cell.clone().set_num_format("yyyy-mm-dd");
                    sheet.write_datetime_with_format(r, c, &date, &fmt)?;
                }
                None => {
                    sheet.write_string_with_format(r, c, d.format("%Y-%m-%d").to_string(), cell)?;
                }
            }
        }
        Value::String(s) => {
            sheet.write_string_with_format(r, c, s, cell)?;
        }
        Value::Invalid | Value::Absent => {
            sheet.write_blank(r, c, cell)?;
        }
    }
    Ok(())
}

/// `#,##0` followed by `scale` decimal places.
fn number_format(scale: u32) -> String {
    if scale == 0 {
        "#,##0".to_string()
    } else {
        format!("#,##0.{}", "0".repeat(scale as usize))
    }
}

#[async_trait]
impl Sink for XlsxSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Xlsx
    }

    async fn write(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
    ) -> Result<WriteResult, ExportError> {
        let bytes = self.encode(records)?;
        let path = write_artifact(dest, &artifact_stem(), "xlsx", bytes).await?;
        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(WriteResult {
            location: path.display().to_string(),
            rows_written: records.len(),
            path: Some(path),
            backup: None,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NormalizedField;
    use crate::schema::FieldType;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn record(id: &str, total: Decimal) -> NormalizedRecord {
        let field = |name: &str, field_type, value| NormalizedField {
            name: name.into(),
            field_type,
            value,
            raw: None,
        };
        NormalizedRecord {
            fields: vec![
                field("invoice_id", FieldType::String, Value::String(id.into())),
                field(
                    "date",
                    FieldType::Date,
                    Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
                ),
                field("total", FieldType::Decimal, Value::Decimal(total)),
                field("quantity", FieldType::Integer, Value::Integer(3)),
                field("vendor", FieldType::String, Value::Absent),
            ],
        }
    }

    #[test]
    fn workbook_is_a_zip_with_one_worksheet() {
        let bytes = XlsxSink::default()
            .encode(&[record("A-1", Decimal::new(150000, 2)), record("A-2", Decimal::new(5, 1))])
            .unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        let names = String::from_utf8_lossy(&bytes);
        assert!(names.contains("xl/worksheets/sheet1.xml"));
        assert!(!names.contains("xl/worksheets/sheet2.xml"));
    }

    #[test]
    fn empty_input_still_makes_a_workbook() {
        let bytes = XlsxSink::default().encode(&[]).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn number_formats_follow_decimal_scale() {
        assert_eq!(number_format(0), "#,##0");
        assert_eq!(number_format(2), "#,##0.00");
        assert_eq!(number_format(4), "#,##0.0000");
    }

    #[test]
    fn old_dates_do_not_fail_the_export() {
        let mut rec = record("A-1", Decimal::ONE);
        rec.fields[1].value = Value::Date(NaiveDate::from_ymd_opt(1850, 1, 1).unwrap());
        assert!(XlsxSink::default().encode(&[rec]).is_ok());
    }

    #[test]
    fn rejects_names_excel_would_refuse() {
        for name in ["", "Q1/Q2", "a[1]", "x".repeat(32).as_str()] {
            let err = XlsxSink::new(&ExportConfig {
                xlsx_sheet_name: name.to_string(),
                ..Default::default()
            })
            .unwrap_err();
            assert!(matches!(err, Pdf2SheetError::InvalidConfig(_)), "{name:?}");
        }
        assert!(XlsxSink::new(&ExportConfig {
            xlsx_sheet_name: "Facturas 2024".into(),
            ..Default::default()
        })
        .is_ok());
    }

    #[tokio::test]
    async fn write_creates_xlsx_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let res = XlsxSink::default()
            .write(&[record("A-1", Decimal::TEN)], dir.path())
            .await
            .unwrap();
        let path = res.path.unwrap();
        assert_eq!(path.extension().unwrap(), "xlsx");
        assert_eq!(res.rows_written, 1);
        assert!(std::fs::read(&path).unwrap().starts_with(b"PK"));
    }
}
