//! Remote spreadsheet sink with retry and a local CSV backup.
//!
//! ```text
//! append([header] + rows) ──ok──▶ WriteResult { location: updated range }
//!        │ transient error (network, 429, 5xx): retry with backoff
//!        │ permanent error (other 4xx): stop
//!        ▼
//! <stem>_backup.csv ──ok──▶ WriteResult { backup, warning }
//!        └──err──▶ ExportError::BackupFailed
//! ```

use super::{artifact_stem, header, rows, CsvSink, Sink};
use crate::config::{retry_backoff, OutputFormat, RemoteSheetConfig};
use crate::error::{ExportError, Pdf2SheetError};
use crate::output::WriteResult;
use crate::record::NormalizedRecord;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// A failed append.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// Worth retrying.
    pub transient: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Moves rows into a remote spreadsheet.
#[async_trait]
pub trait SheetTransport: Send + Sync {
    /// Append `values` and return the updated location.
    async fn append(
        &self,
        target: &RemoteSheetConfig,
        values: &[Vec<String>],
    ) -> Result<String, TransportError>;
}

/// Values-append over HTTPS with a bearer token.
///
/// `POST {endpoint}/spreadsheets/{id}/values/{range}:append?valueInputOption=RAW`
#[derive(Debug, Clone)]
pub struct HttpSheetTransport {
    client: reqwest::Client,
}

impl HttpSheetTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, Pdf2SheetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Pdf2SheetError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn append_url(target: &RemoteSheetConfig) -> Result<Url, TransportError> {
        let range = format!("{}:append", target.range);
        let mut url = Url::parse(&target.endpoint)
            .map_err(|e| TransportError::permanent(format!("bad endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::permanent("endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend([
                "spreadsheets",
                target.spreadsheet_id.as_str(),
                "values",
                range.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl SheetTransport for HttpSheetTransport {
    async fn append(
        &self,
        target: &RemoteSheetConfig,
        values: &[Vec<String>],
    ) -> Result<String, TransportError> {
        let url = Self::append_url(target)?;
        debug!("POST {}", url);

        let mut request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "values": values }));
        if let Some(token) = &target.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("HTTP {status}");
            return Err(if is_transient(status) {
                TransportError::transient(msg)
            } else {
                TransportError::permanent(msg)
            });
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Ok(body["updates"]["updatedRange"]
            .as_str()
            .map(|r| format!("{}/{}", target.spreadsheet_id, r))
            .unwrap_or_else(|| format!("{}/{}", target.spreadsheet_id, target.range)))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Appends to a remote spreadsheet; falls back to a local CSV backup.
///
/// The header row goes out with the first successful append only, so a
/// batch writing into one sheet gets a single header.
#[derive(Clone)]
pub struct RemoteSheetSink {
    config: RemoteSheetConfig,
    transport: Arc<dyn SheetTransport>,
    backup: CsvSink,
    header_sent: Arc<AtomicBool>,
}

impl RemoteSheetSink {
    pub fn new(
        config: RemoteSheetConfig,
        transport: Arc<dyn SheetTransport>,
        backup: CsvSink,
    ) -> Self {
        Self {
            config,
            transport,
            backup,
            header_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sink using [`HttpSheetTransport`].
    pub fn http(config: RemoteSheetConfig, backup: CsvSink) -> Result<Self, Pdf2SheetError> {
        let transport = HttpSheetTransport::new(config.timeout_secs)?;
        Ok(Self::new(config, Arc::new(transport), backup))
    }

    async fn append_with_retry(&self, values: &[Vec<String>]) -> Result<String, TransportError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = TransportError::permanent("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                warn!(
                    "Remote sheet: retry {}/{} after {:?}",
                    attempt,
                    attempts - 1,
                    backoff
                );
                sleep(backoff).await;
            }

            match self.transport.append(&self.config, values).await {
                Ok(location) => return Ok(location),
                Err(e) => {
                    warn!("Remote sheet: attempt {} failed: {}", attempt + 1, e);
                    let transient = e.transient;
                    last_err = e;
                    if !transient {
                        break;
                    }
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl Sink for RemoteSheetSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Sheet
    }

    async fn write(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
    ) -> Result<WriteResult, ExportError> {
        let with_header =
            self.config.include_header && !self.header_sent.swap(true, Ordering::SeqCst);
        let mut values = Vec::with_capacity(records.len() + 1);
        if with_header {
            values.push(header(records));
        }
        values.extend(rows(records));

        let remote_err = match self.append_with_retry(&values).await {
            Ok(location) => {
                info!("Appended {} rows to {}", records.len(), location);
                return Ok(WriteResult {
                    location,
                    rows_written: records.len(),
                    path: None,
                    backup: None,
                    warnings: Vec::new(),
                });
            }
            Err(e) => {
                if with_header {
                    self.header_sent.store(false, Ordering::SeqCst);
                }
                e
            }
        };

        let stem = format!("{}_backup", artifact_stem());
        match self.backup.write_named(records, dest, &stem).await {
            Ok(path) => {
                let warning = format!(
                    "remote export failed ({}); rows saved to local backup {}",
                    remote_err,
                    path.display()
                );
                warn!("{}", warning);
                Ok(WriteResult {
                    location: path.display().to_string(),
                    rows_written: records.len(),
                    path: Some(path.clone()),
                    backup: Some(path),
                    warnings: vec![warning],
                })
            }
            Err(backup_err) => Err(ExportError::BackupFailed {
                remote: remote_err.to_string(),
                backup: backup_err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NormalizedField, Value};
    use crate::schema::FieldType;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Fails the first `failures` calls with the given kind of error and
    /// records every batch it was sent.
    struct Scripted {
        failures: usize,
        transient: bool,
        calls: AtomicUsize,
        sent: Mutex<Vec<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl SheetTransport for Scripted {
        async fn append(
            &self,
            target: &RemoteSheetConfig,
            values: &[Vec<String>],
        ) -> Result<String, TransportError> {
            self.sent.lock().unwrap().push(values.to_vec());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TransportError {
                    message: "HTTP 503".into(),
                    transient: self.transient,
                })
            } else {
                Ok(format!("{}/Sheet1!A1:B2", target.spreadsheet_id))
            }
        }
    }

    fn sink(failures: usize, transient: bool) -> (RemoteSheetSink, Arc<Scripted>) {
        sink_with(
            failures,
            transient,
            RemoteSheetConfig {
                spreadsheet_id: "sheet-1".into(),
                max_attempts: 3,
                retry_backoff_ms: 1,
                ..Default::default()
            },
        )
    }

    fn sink_with(
        failures: usize,
        transient: bool,
        config: RemoteSheetConfig,
    ) -> (RemoteSheetSink, Arc<Scripted>) {
        let transport = Arc::new(Scripted {
            failures,
            transient,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        });
        let s = RemoteSheetSink::new(
            config,
            Arc::clone(&transport) as Arc<dyn SheetTransport>,
            CsvSink::default(),
        );
        (s, transport)
    }

    fn records() -> Vec<NormalizedRecord> {
        vec![NormalizedRecord {
            fields: vec![NormalizedField {
                name: "invoice_id".into(),
                field_type: FieldType::String,
                value: Value::String("12345".into()),
                raw: Some("12345".into()),
            }],
        }]
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink(2, true);
        let res = s.write(&records(), dir.path()).await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
        assert_eq!(res.location, "sheet-1/Sheet1!A1:B2");
        assert!(res.backup.is_none());
        assert!(res.warnings.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_write_backup() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink(5, true);
        let res = s.write(&records(), dir.path()).await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
        let backup = res.backup.unwrap();
        assert!(backup.exists());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_backup.csv"));
        assert_eq!(res.warnings.len(), 1);
    }

    #[tokio::test]
    async fn many_attempts_with_zero_backoff_do_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink_with(
            usize::MAX,
            true,
            RemoteSheetConfig {
                spreadsheet_id: "sheet-1".into(),
                max_attempts: 70,
                retry_backoff_ms: 0,
                ..Default::default()
            },
        );
        let res = s.write(&records(), dir.path()).await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 70);
        assert!(res.backup.unwrap().exists());
    }

    #[tokio::test]
    async fn header_goes_out_once_per_sink() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink(0, true);
        s.write(&records(), dir.path()).await.unwrap();
        s.write(&records(), dir.path()).await.unwrap();

        let sent = t.sent.lock().unwrap();
        assert_eq!(sent[0], vec![vec!["invoice_id".to_string()], vec!["12345".to_string()]]);
        assert_eq!(sent[1], vec![vec!["12345".to_string()]]);
    }

    #[tokio::test]
    async fn header_is_resent_after_a_failed_first_append() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink(1, false);
        s.write(&records(), dir.path()).await.unwrap();
        s.write(&records(), dir.path()).await.unwrap();

        let sent = t.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1][0], vec!["invoice_id".to_string()]);
    }

    #[tokio::test]
    async fn header_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink_with(
            0,
            true,
            RemoteSheetConfig {
                spreadsheet_id: "sheet-1".into(),
                include_header: false,
                ..Default::default()
            },
        );
        s.write(&records(), dir.path()).await.unwrap();
        assert_eq!(t.sent.lock().unwrap()[0], vec![vec!["12345".to_string()]]);
    }

    #[tokio::test]
    async fn permanent_failure_stops_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let (s, t) = sink(1, false);
        let res = s.write(&records(), dir.path()).await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
        assert!(res.backup.is_some());
    }

    #[tokio::test]
    async fn failed_backup_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let (s, _) = sink(5, false);
        let err = s.write(&records(), &blocker).await.unwrap_err();
        assert!(matches!(err, ExportError::BackupFailed { .. }));
    }

    #[test]
    fn append_url_encodes_the_range() {
        let target = RemoteSheetConfig {
            endpoint: "https://sheets.example.com/v4/".into(),
            spreadsheet_id: "abc".into(),
            range: "My Sheet!A1".into(),
            ..Default::default()
        };
        let url = HttpSheetTransport::append_url(&target).unwrap();
        assert!(url
            .as_str()
            .starts_with("https://sheets.example.com/v4/spreadsheets/abc/values/My%20Sheet!A1:append?"));
        assert!(url.as_str().contains("valueInputOption=RAW"));
    }
}
