//! Exporter abstraction: persist a document's valid records.
//!
//! Every sink implements [`Sink`]. Local sinks write one artifact per call
//! into the destination directory:
//!
//! ```text
//! result_<YYYYmmdd_HHMMSS_mmm>.<ext>      first choice
//! result_<YYYYmmdd_HHMMSS_mmm>_1.<ext>    if the name is taken, and so on
//! result_<YYYYmmdd_HHMMSS_mmm>_backup.csv remote sink fallback
//! ```
//!
//! Artifacts are written to a hidden temporary file in the destination and
//! persisted under their final name only when complete.

pub mod csv;
pub mod json;
pub mod remote;
pub mod xlsx;

pub use self::csv::CsvSink;
pub use self::json::JsonSink;
pub use self::remote::{HttpSheetTransport, RemoteSheetSink, SheetTransport, TransportError};
pub use self::xlsx::XlsxSink;

use crate::config::OutputFormat;
use crate::error::ExportError;
use crate::output::WriteResult;
use crate::record::NormalizedRecord;
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Numeric suffixes tried before giving up on a free artifact name.
const MAX_NAME_SUFFIX: usize = 1000;

/// A destination for normalised records.
#[async_trait]
pub trait Sink: Send + Sync {
    fn format(&self) -> OutputFormat;

    /// Write `records` to `dest` (a directory for local sinks; the local
    /// backup directory for the remote sink).
    async fn write(
        &self,
        records: &[NormalizedRecord],
        dest: &Path,
    ) -> Result<WriteResult, ExportError>;
}

/// `result_<YYYYmmdd_HHMMSS_mmm>` for the current local time.
pub fn artifact_stem() -> String {
    format!("result_{}", chrono::Local::now().format("%Y%m%d_%H%M%S_%3f"))
}

/// Declared field names of the first record.
pub fn header(records: &[NormalizedRecord]) -> Vec<String> {
    records
        .first()
        .map(|r| r.names().map(String::from).collect())
        .unwrap_or_default()
}

/// Canonical text of every field; absent and invalid values are empty.
pub fn rows(records: &[NormalizedRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|r| {
            r.fields
                .iter()
                .map(|f| f.value.canonical().unwrap_or_default())
                .collect()
        })
        .collect()
}

/// Write `bytes` to a fresh `<stem>[_n].<ext>` inside `dir`.
///
/// The data lands in a hidden temporary file in `dir` first; the final name
/// only appears once it is complete.
pub(crate) async fn write_artifact(
    dir: &Path,
    stem: &str,
    ext: &str,
    bytes: Vec<u8>,
) -> Result<PathBuf, ExportError> {
    let target = dir.to_path_buf();
    let (dir, stem, ext) = (dir.to_path_buf(), stem.to_string(), ext.to_string());
    tokio::task::spawn_blocking(move || persist_artifact(&dir, &stem, &ext, &bytes))
        .await
        .map_err(|e| io_error(&target, std::io::Error::other(format!("write task panicked: {e}"))))?
}

fn persist_artifact(dir: &Path, stem: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".pdf2sheet-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| io_error(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| io_error(tmp.path(), e))?;

    // `persist_noclobber` claims the name and publishes the data in one step.
    for n in 0..MAX_NAME_SUFFIX {
        let name = if n == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{n}.{ext}")
        };
        let candidate = dir.join(name);
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(io_error(&candidate, e.error)),
        }
    }
    Err(io_error(
        &dir.join(stem),
        std::io::Error::new(ErrorKind::AlreadyExists, "no free artifact name"),
    ))
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}
