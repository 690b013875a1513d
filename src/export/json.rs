//! Structured JSON sink: a pretty array of objects in field order.

use super::{artifact_stem, write_artifact, Sink};
use crate::config::OutputFormat;
use crate::error::ExportError;
use crate::output::WriteResult;
use crate::record::NormalizedRecord;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::info;

/// Dates as `YYYY-MM-DD`, decimals as strings, integers as numbers, absent
/// and invalid values as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSink;

impl JsonSink {
    pub fn encode(&self, records: &[NormalizedRecord]) -> Result<Vec<u8>, ExportError> {
        let array: Vec<JsonValue> = records
            .iter()
            .map(|r| JsonValue::Object(r.to_json_object()))
            .collect();
        let mut bytes = serde_json::to_vec_pretty(&array)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[async_trait]
impl Sink for JsonSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    async fn write(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
    ) -> Result<WriteResult, ExportError> {
        let bytes = self.encode(records)?;
        let path = write_artifact(dest, &artifact_stem(), "json", bytes).await?;
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
    use crate::record::{NormalizedField, Value};
    use crate::schema::FieldType;
    use rust_decimal::Decimal;

    #[test]
    fn typed_values_and_field_order() {
        let rec = NormalizedRecord {
            fields: vec![
                NormalizedField {
                    name: "total".into(),
                    field_type: FieldType::Decimal,
                    value: Value::Decimal(Decimal::new(150000, 2)),
                    raw: Some("$1,500.00".into()),
                },
                NormalizedField {
                    name: "quantity".into(),
                    field_type: FieldType::Integer,
                    value: Value::Integer(3),
                    raw: Some("3".into()),
                },
                NormalizedField {
                    name: "vendor".into(),
                    field_type: FieldType::String,
                    value: Value::Absent,
                    raw: None,
                },
            ],
        };
        let bytes = JsonSink.encode(&[rec]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["total"], "1500.00");
        assert_eq!(parsed[0]["quantity"], 3);
        assert!(parsed[0]["vendor"].is_null());
        // preserve_order keeps declaration order.
        let total_at = text.find("\"total\"").unwrap();
        let vendor_at = text.find("\"vendor\"").unwrap();
        assert!(total_at < vendor_at);
    }

    #[test]
    fn empty_input_is_an_empty_array() {
        let text = String::from_utf8(JsonSink.encode(&[]).unwrap()).unwrap();
        assert_eq!(text.trim(), "[]");
    }
}
