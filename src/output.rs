//! Result types: per-document outcome, sink write result, run summary.

use crate::error::DocumentError;
use crate::pipeline::extract::ExtractionStrategy;
use crate::pipeline::validate::ValidationReport;
use crate::record::NormalizedRecord;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// What a sink wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// File path or remote range the rows went to.
    pub location: String,
    pub rows_written: usize,
    /// Local file created by this write, if any.
    pub path: Option<PathBuf>,
    /// Set when a remote write fell back to a local backup.
    pub backup: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Outcome of one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    pub source: PathBuf,
    pub name: String,
    /// Template that was applied.
    pub parser: Option<String>,
    pub strategy: Option<ExtractionStrategy>,
    /// Every record the template produced, valid or not, after deduplication.
    pub records: Vec<NormalizedRecord>,
    /// One report per entry of `records`.
    pub reports: Vec<ValidationReport>,
    pub rows_extracted: usize,
    pub rows_exported: usize,
    /// Invalid records, plus one for a document-level error.
    pub error_count: usize,
    pub warning_count: usize,
    pub output: Option<WriteResult>,
    pub error: Option<DocumentError>,
    pub elapsed_ms: u64,
}

impl DocumentResult {
    /// An empty result for `source`, before any stage ran.
    pub fn new(source: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            parser: None,
            strategy: None,
            records: Vec::new(),
            reports: Vec::new(),
            rows_extracted: 0,
            rows_exported: 0,
            error_count: 0,
            warning_count: 0,
            output: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    /// Record a document-level failure.
    pub fn fail(&mut self, error: DocumentError) {
        self.error_count += 1;
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Valid records only, in order.
    pub fn valid_records(&self) -> impl Iterator<Item = &NormalizedRecord> {
        self.records
            .iter()
            .zip(&self.reports)
            .filter(|(_, r)| r.valid)
            .map(|(rec, _)| rec)
    }

    /// Warnings carried by the sink result.
    pub fn output_warnings(&self) -> &[String] {
        self.output
            .as_ref()
            .map(|o| o.warnings.as_slice())
            .unwrap_or(&[])
    }
}

/// Aggregate of a run. Built once from the document results.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub rows_extracted: usize,
    pub rows_exported: usize,
    pub errors: usize,
    pub warnings: usize,
    pub elapsed_ms: u64,
    pub outputs: Vec<String>,
    pub documents: Vec<DocumentResult>,
}

impl RunSummary {
    pub fn from_results(documents: Vec<DocumentResult>, elapsed_ms: u64) -> Self {
        let outputs = documents
            .iter()
            .filter_map(|d| d.output.as_ref())
            .map(|o| o.location.clone())
            .collect();
        Self {
            documents_processed: documents.len(),
            documents_failed: documents.iter().filter(|d| !d.is_success()).count(),
            rows_extracted: documents.iter().map(|d| d.rows_extracted).sum(),
            rows_exported: documents.iter().map(|d| d.rows_exported).sum(),
            errors: documents.iter().map(|d| d.error_count).sum(),
            warnings: documents.iter().map(|d| d.warning_count).sum(),
            elapsed_ms,
            outputs,
            documents,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Documents processed: {} ({} failed)",
            self.documents_processed, self.documents_failed
        )?;
        writeln!(f, "Rows extracted:      {}", self.rows_extracted)?;
        writeln!(f, "Rows exported:       {}", self.rows_exported)?;
        writeln!(f, "Errors:              {}", self.errors)?;
        writeln!(f, "Warnings:            {}", self.warnings)?;
        write!(f, "Elapsed:             {:.2}s", self.elapsed_ms as f64 / 1000.0)?;
        if !self.outputs.is_empty() {
            write!(f, "\nOutputs:")?;
            for o in &self.outputs {
                write!(f, "\n  {o}")?;
            }
        }
        Ok(())
    }
}
