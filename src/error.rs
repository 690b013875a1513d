//! Error types for the edgequake-pdf2sheet library.
//!
//! Failures are split by how far they reach:
//!
//! * [`Pdf2SheetError`]: **Fatal** for a call: the input directory is
//!   missing, the output directory cannot be created, the configuration is
//!   invalid. Returned as `Err` from [`crate::Pipeline::process_directory`]
//!   and the constructors.
//!
//! * [`ExtractionError`], [`ParserError`], [`ExportError`]: **Per document**:
//!   one file cannot be read, matched to a template or written. They are
//!   converted into a [`DocumentError`] and stored on the
//!   [`crate::output::DocumentResult`]; the batch moves on.
//!
//! * Validation problems are not errors at all. They are data in the
//!   [`crate::pipeline::validate::ValidationReport`].
//!
//! * [`JobError`]: returned by the job store and manager.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2sheet library.
#[derive(Debug, Error)]
pub enum Pdf2SheetError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file or directory was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// A directory was expected but the path is something else.
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output directory could not be created or written.
    #[error("Output directory '{path}' is not writable: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the extraction stage could not produce content for a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The bytes could not be parsed as a PDF.
    #[error("document is unreadable: {detail}")]
    Unreadable { detail: String },

    /// The file was read but does not start with the PDF magic bytes.
    #[error("not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The document is password protected.
    #[error("document is encrypted")]
    Encrypted,

    /// The document has no pages.
    #[error("document has zero pages")]
    Empty,

    /// No strategy produced any text.
    #[error("no extractable content")]
    NoContent,

    /// pdfium could not render a page for OCR.
    #[error("rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// The OCR engine failed on a page after all retries.
    #[error("OCR failed for page {page}: {detail}")]
    Ocr { page: usize, detail: String },

    /// Reading the document from disk failed.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Template resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParserError {
    /// An explicit parser identifier is not registered.
    #[error("unknown parser '{id}' (available: {})", available.join(", "))]
    UnknownParser { id: String, available: Vec<String> },

    /// Auto-detection found no template whose heuristic matched.
    #[error("no registered template matches this document")]
    NoMatchingParser,
}

/// Sink failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XLSX encoding failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// The remote sink failed and the local backup could not be written either.
    #[error("remote export failed ({remote}); local backup failed: {backup}")]
    BackupFailed { remote: String, backup: String },

    /// The sink has no configuration for the requested destination.
    #[error("sink not configured: {0}")]
    NotConfigured(String),
}

/// Pipeline stage names, used in progress events, logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Extract,
    Parse,
    Normalize,
    Validate,
    Export,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Load,
        Stage::Extract,
        Stage::Parse,
        Stage::Normalize,
        Stage::Validate,
        Stage::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Extract => "extract",
            Stage::Parse => "parse",
            Stage::Normalize => "normalize",
            Stage::Validate => "validate",
            Stage::Export => "export",
        }
    }

    /// Zero-based position in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal error for a single document.
///
/// Stored inside [`crate::output::DocumentResult`]. The batch continues.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentError {
    /// The file could not be opened or is not a PDF.
    #[error("load failed: {detail}")]
    Input { detail: String },

    /// Extraction produced nothing usable.
    #[error("extraction failed: {detail}")]
    Extraction { detail: String },

    /// No template could be applied.
    #[error("parser failed: {detail}")]
    Parser { detail: String },

    /// The sink rejected the records.
    #[error("export failed: {detail}")]
    Export { detail: String },

    /// Processing was cancelled before the named stage.
    #[error("cancelled before {stage}")]
    Cancelled { stage: Stage },
}

impl From<ExtractionError> for DocumentError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::NotAPdf { .. } | ExtractionError::Io(_) => DocumentError::Input {
                detail: e.to_string(),
            },
            other => DocumentError::Extraction {
                detail: other.to_string(),
            },
        }
    }
}

impl From<ParserError> for DocumentError {
    fn from(e: ParserError) -> Self {
        DocumentError::Parser {
            detail: e.to_string(),
        }
    }
}

impl From<ExportError> for DocumentError {
    fn from(e: ExportError) -> Self {
        DocumentError::Export {
            detail: e.to_string(),
        }
    }
}

/// Job store and job manager errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job '{id}' not found")]
    NotFound { id: String },

    /// A state change outside `queued → processing → completed | failed`.
    #[error("job '{id}': illegal transition {from} → {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Storing an uploaded document failed.
    #[error("upload failed: {0}")]
    Upload(String),
}
