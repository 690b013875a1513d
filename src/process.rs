//! Pipeline orchestrator.
//!
//! [`Pipeline`] drives one document at a time through
//! Load → Extract → Parse → Normalize → Validate → Export and aggregates
//! directory runs into a [`RunSummary`]. A stage failure ends that document
//! only: it is recorded on the [`DocumentResult`] and the batch moves on.

use crate::config::{DedupConfig, KeepPolicy, OutputFormat, PipelineConfig};
use crate::document::{Document, PdfBackend};
use crate::error::{DocumentError, ExportError, Pdf2SheetError, Stage};
use crate::export::{CsvSink, JsonSink, RemoteSheetSink, SheetTransport, Sink, XlsxSink};
use crate::output::{DocumentResult, RunSummary};
use crate::pipeline::extract::ExtractionEngine;
use crate::pipeline::input;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::ocr::{OcrEngine, VisionOcr};
use crate::pipeline::pdfium::PdfiumBackend;
use crate::pipeline::validate::{FieldStatus, ValidationReport, Validator};
use crate::progress::{NoopProgressCallback, PipelineProgressCallback};
use crate::record::NormalizedRecord;
use crate::templates::TemplateRegistry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Template id; `None` or `"auto"` auto-detects.
    pub parser: Option<String>,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    /// Run every stage except export.
    pub dry_run: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            parser: None,
            format: OutputFormat::Csv,
            output_dir: PathBuf::from("output"),
            dry_run: false,
        }
    }
}

impl ProcessOptions {
    /// Create the output directory. A dry run writes nothing and skips it.
    ///
    /// # Errors
    /// `OutputNotWritable` if the directory cannot be created.
    pub async fn prepare_output_dir(&self) -> Result<(), Pdf2SheetError> {
        if self.dry_run {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Pdf2SheetError::OutputNotWritable {
                path: self.output_dir.clone(),
                source: e,
            })
    }
}

/// Cooperative cancellation, checked before every stage.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The document-to-record pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    engine: ExtractionEngine,
    registry: TemplateRegistry,
    normalizer: Normalizer,
    validator: Validator,
    sinks: HashMap<OutputFormat, Arc<dyn Sink>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("templates", &self.registry.ids())
            .field("ocr", &self.engine.has_ocr())
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    /// Production pipeline: pdfium backend, vision OCR when a provider is
    /// configured, built-in templates, CSV/JSON sinks and the remote sink
    /// when `config.export.remote` is set.
    pub fn new(config: PipelineConfig) -> Result<Self, Pdf2SheetError> {
        Self::builder(config).build()
    }

    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            backend: None,
            ocr: None,
            registry: None,
            transport: None,
            sinks: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn has_sink(&self, format: OutputFormat) -> bool {
        self.sinks.contains_key(&format)
    }

    /// Process one file.
    pub async fn process_file(&self, path: &Path, opts: &ProcessOptions) -> DocumentResult {
        self.process_file_with_progress(path, opts, &NoopProgressCallback)
            .await
    }

    pub async fn process_file_with_progress(
        &self,
        path: &Path,
        opts: &ProcessOptions,
        progress: &dyn PipelineProgressCallback,
    ) -> DocumentResult {
        let name = input::display_name(path);
        progress.on_document_start(1, 1, &name);
        self.run_document(path, &name, opts, None, progress).await
    }

    /// Process every `*.pdf` in `dir`, in name order, one at a time.
    ///
    /// # Errors
    /// Only for a missing or unreadable `dir` and an output directory that
    /// cannot be created. Everything else lands in the summary.
    pub async fn process_directory(
        &self,
        dir: &Path,
        opts: &ProcessOptions,
    ) -> Result<RunSummary, Pdf2SheetError> {
        self.process_directory_with_progress(dir, opts, &NoopProgressCallback)
            .await
    }

    pub async fn process_directory_with_progress(
        &self,
        dir: &Path,
        opts: &ProcessOptions,
        progress: &dyn PipelineProgressCallback,
    ) -> Result<RunSummary, Pdf2SheetError> {
        let start = Instant::now();
        let files = input::list_pdfs(dir).await?;
        opts.prepare_output_dir().await?;

        let total = files.len();
        info!("Found {} PDF files in {}", total, dir.display());
        progress.on_batch_start(total);

        let mut results = Vec::with_capacity(total);
        for (i, path) in files.iter().enumerate() {
            let name = input::display_name(path);
            progress.on_document_start(i + 1, total, &name);
            results.push(self.run_document(path, &name, opts, None, progress).await);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        progress.on_batch_complete(total, failed);

        let summary = RunSummary::from_results(results, start.elapsed().as_millis() as u64);
        info!(
            "Run complete: {} documents, {} rows exported, {} errors, {} warnings",
            summary.documents_processed, summary.rows_exported, summary.errors, summary.warnings
        );
        Ok(summary)
    }

    /// Run one document through every stage.
    ///
    /// `name` is the display name; `path` may be a stored upload. When
    /// `cancel` is set the document stops at the next stage boundary and any
    /// output it wrote is removed.
    pub(crate) async fn run_document(
        &self,
        path: &Path,
        name: &str,
        opts: &ProcessOptions,
        cancel: Option<&CancelFlag>,
        progress: &dyn PipelineProgressCallback,
    ) -> DocumentResult {
        let start = Instant::now();
        let mut result = DocumentResult::new(path, name);
        info!("{}: processing", name);

        let outcome = self
            .run_stages(path, name, opts, cancel, progress, &mut result)
            .await;
        if let Err(e) = outcome {
            match &e {
                DocumentError::Cancelled { stage } => info!("{}: cancelled before {}", name, stage),
                other => warn!("{}: {}", name, other),
            }
            result.fail(e);
        }

        result.elapsed_ms = start.elapsed().as_millis() as u64;
        progress.on_document_complete(&result);
        if result.is_success() {
            info!(
                "{}: {} rows extracted, {} exported in {}ms",
                name, result.rows_extracted, result.rows_exported, result.elapsed_ms
            );
        }
        result
    }

    async fn run_stages(
        &self,
        path: &Path,
        name: &str,
        opts: &ProcessOptions,
        cancel: Option<&CancelFlag>,
        progress: &dyn PipelineProgressCallback,
        result: &mut DocumentResult,
    ) -> Result<(), DocumentError> {
        let enter = |stage: Stage| -> Result<(), DocumentError> {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return Err(DocumentError::Cancelled { stage });
            }
            progress.on_stage(name, stage);
            info!("{}: {} stage", name, stage);
            Ok(())
        };

        // ── Load ─────────────────────────────────────────────────────────
        enter(Stage::Load)?;
        let bytes = input::read_pdf(path).await?;
        let doc = Document::load(Arc::clone(self.engine.backend()), name, bytes).await?;
        debug!(
            "{}: {} pages, text layer: {}",
            name,
            doc.page_count(),
            doc.has_text_layer()
        );

        // ── Extract ──────────────────────────────────────────────────────
        enter(Stage::Extract)?;
        let extraction = self.engine.extract(&doc, &self.config.extraction).await?;
        result.strategy = Some(extraction.strategy);

        // ── Parse ────────────────────────────────────────────────────────
        enter(Stage::Parse)?;
        let rule = self.registry.resolve(opts.parser.as_deref(), &extraction)?;
        info!("{}: using template '{}'", name, rule.id);
        result.parser = Some(rule.id.clone());
        let raw = rule.apply(&extraction);

        // ── Normalize ────────────────────────────────────────────────────
        enter(Stage::Normalize)?;
        let records: Vec<NormalizedRecord> = raw
            .iter()
            .map(|r| self.normalizer.normalize(r, &rule.schema().fields))
            .collect();
        result.rows_extracted = records.len();

        // ── Validate ─────────────────────────────────────────────────────
        enter(Stage::Validate)?;
        let reports: Vec<ValidationReport> = records
            .iter()
            .map(|r| self.validator.validate(r, rule.schema()))
            .collect();
        for (i, report) in reports.iter().enumerate() {
            for (subject, status, message) in report.issues() {
                match status {
                    FieldStatus::Error => {
                        warn!("{}: record {}: {} error: {}", name, i + 1, subject, message)
                    }
                    _ => warn!("{}: record {}: {} warning: {}", name, i + 1, subject, message),
                }
            }
        }
        let (records, reports) = dedup(records, reports, &self.config.dedup);
        result.error_count += reports.iter().filter(|r| !r.valid).count();
        result.warning_count += reports.iter().map(|r| r.warning_count()).sum::<usize>();
        result.records = records;
        result.reports = reports;

        // ── Export ───────────────────────────────────────────────────────
        enter(Stage::Export)?;
        let valid: Vec<NormalizedRecord> = result.valid_records().cloned().collect();
        if opts.dry_run {
            debug!("{}: dry run, {} records not exported", name, valid.len());
            return Ok(());
        }
        if valid.is_empty() {
            info!("{}: no valid records to export", name);
            return Ok(());
        }
        let sink = self.sinks.get(&opts.format).ok_or_else(|| {
            ExportError::NotConfigured(format!("no {} sink is configured", opts.format))
        })?;
        let written = sink.write(&valid, &opts.output_dir).await?;

        if cancel.is_some_and(CancelFlag::is_cancelled) {
            for file in written.path.iter().chain(written.backup.iter()) {
                let _ = tokio::fs::remove_file(file).await;
            }
            return Err(DocumentError::Cancelled {
                stage: Stage::Export,
            });
        }

        result.rows_exported = written.rows_written;
        result.warning_count += written.warnings.len();
        result.output = Some(written);
        Ok(())
    }
}

/// Drop duplicate valid records. Invalid records are kept as they are.
fn dedup(
    records: Vec<NormalizedRecord>,
    reports: Vec<ValidationReport>,
    config: &DedupConfig,
) -> (Vec<NormalizedRecord>, Vec<ValidationReport>) {
    if !config.enabled {
        return (records, reports);
    }

    let key = |r: &NormalizedRecord| -> Vec<Option<String>> {
        if config.key_fields.is_empty() {
            r.fields.iter().map(|f| f.value.canonical()).collect()
        } else {
            config
                .key_fields
                .iter()
                .map(|k| r.value(k).canonical())
                .collect()
        }
    };

    let mut chosen: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    for (i, (rec, report)) in records.iter().zip(&reports).enumerate() {
        if !report.valid {
            continue;
        }
        let k = key(rec);
        match config.keep {
            KeepPolicy::First => {
                chosen.entry(k).or_insert(i);
            }
            KeepPolicy::Last => {
                chosen.insert(k, i);
            }
        }
    }
    let keep: HashSet<usize> = chosen.into_values().collect();

    let before = records.len();
    let (records, reports): (Vec<_>, Vec<_>) = records
        .into_iter()
        .zip(reports)
        .enumerate()
        .filter(|(i, (_, report))| !report.valid || keep.contains(i))
        .map(|(_, pair)| pair)
        .unzip();
    if records.len() < before {
        debug!("Deduplication removed {} records", before - records.len());
    }
    (records, reports)
}

/// Builder for [`Pipeline`]; every part defaults to the production one.
pub struct PipelineBuilder {
    config: PipelineConfig,
    backend: Option<Arc<dyn PdfBackend>>,
    ocr: Option<Option<Arc<dyn OcrEngine>>>,
    registry: Option<TemplateRegistry>,
    transport: Option<Arc<dyn SheetTransport>>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl PipelineBuilder {
    pub fn backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(Some(engine));
        self
    }

    /// Never fall back to OCR, whatever the config says.
    pub fn without_ocr(mut self) -> Self {
        self.ocr = Some(None);
        self
    }

    pub fn registry(mut self, registry: TemplateRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Transport for the remote sheet sink instead of HTTP.
    pub fn sheet_transport(mut self, transport: Arc<dyn SheetTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add a sink, replacing the built-in one for the same format.
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<Pipeline, Pdf2SheetError> {
        let config = self.config;

        let backend: Arc<dyn PdfBackend> = match self.backend {
            Some(b) => b,
            None => Arc::new(PdfiumBackend::new(config.pdfium_library.clone())?),
        };

        let ocr = match self.ocr {
            Some(engine) => engine,
            None if config.extraction.ocr_fallback => match VisionOcr::from_config(&config.ocr) {
                Ok(engine) => Some(Arc::new(engine) as Arc<dyn OcrEngine>),
                Err(e) => {
                    warn!("OCR fallback unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let csv = CsvSink::new(&config.export)?;
        let mut sinks: HashMap<OutputFormat, Arc<dyn Sink>> = HashMap::new();
        sinks.insert(OutputFormat::Csv, Arc::new(csv.clone()));
        sinks.insert(OutputFormat::Json, Arc::new(JsonSink));
        sinks.insert(OutputFormat::Xlsx, Arc::new(XlsxSink::new(&config.export)?));
        if let Some(remote) = &config.export.remote {
            let sink = match self.transport {
                Some(t) => RemoteSheetSink::new(remote.clone(), t, csv),
                None => RemoteSheetSink::http(remote.clone(), csv)?,
            };
            sinks.insert(OutputFormat::Sheet, Arc::new(sink));
        }
        for sink in self.sinks {
            sinks.insert(sink.format(), sink);
        }

        Ok(Pipeline {
            engine: ExtractionEngine::new(backend, ocr),
            registry: self.registry.unwrap_or_default(),
            normalizer: Normalizer::new(config.normalization.clone()),
            validator: Validator::new(),
            sinks,
            config,
        })
    }
}
