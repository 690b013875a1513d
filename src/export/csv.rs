//! Flat delimited sink.

use super::{artifact_stem, header, rows, write_artifact, Sink};
use crate::config::{ExportConfig, OutputFormat};
use crate::error::{ExportError, Pdf2SheetError};
use crate::output::WriteResult;
use crate::record::NormalizedRecord;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Header row of declared field names, one row per record.
#[derive(Debug, Clone)]
pub struct CsvSink {
    delimiter: u8,
    include_header: bool,
}

impl Default for CsvSink {
    fn default() -> Self {
        Self {
            delimiter: b',',
            include_header: true,
        }
    }
}

impl CsvSink {
    /// Fails if `config.csv_delimiter` does not fit in a single byte.
    pub fn new(config: &ExportConfig) -> Result<Self, Pdf2SheetError> {
        let delimiter = u8::try_from(config.csv_delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                Pdf2SheetError::InvalidConfig(format!(
                    "CSV delimiter must be ASCII, got {:?}",
                    config.csv_delimiter
                ))
            })?;
        Ok(Self {
            delimiter,
            include_header: config.include_header,
        })
    }

    /// Encode `records` without touching the filesystem.
    pub fn encode(&self, records: &[NormalizedRecord]) -> Result<Vec<u8>, ExportError> {
        let mut w = ::csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());
        if self.include_header && !records.is_empty() {
            w.write_record(header(records))?;
        }
        for row in rows(records) {
            w.write_record(&row)?;
        }
        w.into_inner()
            .map_err(|e| ExportError::Csv(::csv::Error::from(e.into_error())))
    }

    /// Encode and write to a fresh artifact named `<stem>[_n].csv`.
    pub(crate) async fn write_named(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
        stem: &str,
    ) -> Result<std::path::PathBuf, ExportError> {
        let bytes = self.encode(records)?;
        write_artifact(dest, stem, "csv", bytes).await
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Csv
    }

    async fn write(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
    ) -> Result<WriteResult, ExportError> {
        let path = self.write_named(records, dest, &artifact_stem()).await?;
        info!("Wrote {} rows to {}", records.len(), path.display());
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
    use crate::record::{NormalizedField, Value};
    use crate::schema::FieldType;
    use chrono::NaiveDate;

    fn record(id: &str, vendor: &str) -> NormalizedRecord {
        NormalizedRecord {
            fields: vec![
                NormalizedField {
                    name: "invoice_id".into(),
                    field_type: FieldType::String,
                    value: Value::String(id.into()),
                    raw: Some(id.into()),
                },
                NormalizedField {
                    name: "date".into(),
                    field_type: FieldType::Date,
                    value: Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
                    raw: Some("03/15/2024".into()),
                },
                NormalizedField {
                    name: "vendor".into(),
                    field_type: FieldType::String,
                    value: Value::String(vendor.into()),
                    raw: Some(vendor.into()),
                },
            ],
        }
    }

    #[test]
    fn quotes_cells_containing_the_delimiter() {
        let out = CsvSink::default()
            .encode(&[record("1", "ACME, Inc.")])
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "invoice_id,date,vendor\n1,2024-03-15,\"ACME, Inc.\"\n"
        );
    }

    #[test]
    fn custom_delimiter_without_header() {
        let sink = CsvSink::new(&ExportConfig {
            csv_delimiter: ';',
            include_header: false,
            ..Default::default()
        })
        .unwrap();
        let out = sink.encode(&[record("1", "ACME")]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1;2024-03-15;ACME\n");
    }

    #[test]
    fn rejects_delimiters_wider_than_a_byte() {
        for c in ['é', '€'] {
            let err = CsvSink::new(&ExportConfig {
                csv_delimiter: c,
                ..Default::default()
            })
            .unwrap_err();
            assert!(matches!(err, Pdf2SheetError::InvalidConfig(_)), "{c:?}");
        }
    }

    #[tokio::test]
    async fn write_creates_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = CsvSink::default()
            .write(&[record("1", "ACME"), record("2", "Beta")], dir.path())
            .await
            .unwrap();
        assert_eq!(res.rows_written, 2);
        let path = res.path.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("result_") && name.ends_with(".csv"), "{name}");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
