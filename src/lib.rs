//! # edgequake-pdf2sheet
//!
//! Turn PDF invoices, statements and reports into validated, typed records
//! and write them to CSV, JSON, Excel or a remote spreadsheet.
//!
//! ## Why this crate?
//!
//! Business PDFs carry the same handful of facts (an invoice number, a date,
//! a total, a table of line items) in endlessly different layouts. This crate
//! picks the cheapest extraction that works for each document (its text
//! layer, column-aligned tables, or a vision model for scanned pages),
//! matches a declarative template against the result and normalises every
//! value to a canonical type before checking it against the template's
//! schema. Invalid records are reported, never silently exported.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Load       read bytes, check magic, open with pdfium
//!  ├─ 2. Extract    text layer → tables → OCR fallback for scanned pages
//!  ├─ 3. Parse      template auto-detected or chosen → raw records
//!  ├─ 4. Normalize  dates, decimals, integers, clean strings
//!  ├─ 5. Validate   per-field status + record-level checks
//!  └─ 6. Export     CSV | JSON | XLSX | remote sheet (local CSV backup on failure)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2sheet::{Pipeline, PipelineConfig, ProcessOptions};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(PipelineConfig::default())?;
//!     let opts = ProcessOptions {
//!         output_dir: "out".into(),
//!         ..Default::default()
//!     };
//!     let summary = pipeline.process_directory(Path::new("invoices"), &opts).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2sheet` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2sheet = { version = "0.1", default-features = false }
//! ```
//!
//! ## Templates
//!
//! | Id | Detects | Records |
//! |----|---------|---------|
//! | `financial_report` | financial statement keywords (English and Spanish) | one per statement line |
//! | `invoice` | invoice, factura, folio, tax id keywords | one per document |
//! | `report` | report keywords or any table | one per table row |
//!
//! Register your own with [`TemplateRegistry::register`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod jobs;
#[cfg(feature = "cli")]
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod templates;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DateOrder, DedupConfig, ExportConfig, ExtractionOptions, KeepPolicy, NormalizerConfig,
    NumberFormat, OcrConfig, OutputFormat, PipelineConfig, PipelineConfigBuilder,
    RemoteSheetConfig,
};
pub use document::{Document, DocumentInfo, PdfBackend};
pub use error::{
    DocumentError, ExportError, ExtractionError, JobError, ParserError, Pdf2SheetError, Stage,
};
pub use export::{
    CsvSink, JsonSink, RemoteSheetSink, SheetTransport, Sink, TransportError, XlsxSink,
};
pub use jobs::{Job, JobManager, JobResult, JobStatus, JobStore, JobView};
pub use output::{DocumentResult, RunSummary, WriteResult};
pub use pipeline::extract::{ExtractionResult, ExtractionStrategy};
pub use pipeline::ocr::OcrEngine;
pub use pipeline::validate::{FieldStatus, ValidationReport};
pub use process::{CancelFlag, Pipeline, PipelineBuilder, ProcessOptions};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use record::{NormalizedRecord, Record, Value};
pub use schema::{FieldSpec, FieldType, Schema};
pub use templates::{TemplateRegistry, TemplateRule};
