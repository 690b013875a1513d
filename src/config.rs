//! Configuration types for document-to-spreadsheet extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Plain-data sections ([`ExtractionOptions`],
//! [`NormalizerConfig`], [`ExportConfig`], [`DedupConfig`]) derive serde so a
//! host application can load them from whatever file format it uses; the
//! library itself never reads configuration files.

use crate::error::Pdf2SheetError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2sheet::{DateOrder, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .prefer_tables(true)
///     .date_order(DateOrder::DayFirst)
///     .workers(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Strategy selection for the extraction stage.
    pub extraction: ExtractionOptions,

    /// Vision model used for OCR of pages without a text layer.
    pub ocr: OcrConfig,

    /// Locale rules for dates and numbers.
    pub normalization: NormalizerConfig,

    /// Sink settings.
    pub export: ExportConfig,

    /// Optional record deduplication before export.
    pub dedup: DedupConfig,

    /// Concurrent jobs run by [`crate::jobs::JobManager`]. Default: 4.
    pub workers: usize,

    /// Explicit pdfium shared library. Falls back to `PDFIUM_LIB_PATH`,
    /// then the working directory, then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Where [`crate::jobs::JobManager::submit_upload`] stores uploads.
    /// Default: `<tmp>/pdf2sheet-uploads`.
    pub upload_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionOptions::default(),
            ocr: OcrConfig::default(),
            normalization: NormalizerConfig::default(),
            export: ExportConfig::default(),
            dedup: DedupConfig::default(),
            workers: DEFAULT_WORKERS,
            pdfium_library: None,
            upload_dir: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("extraction", &self.extraction)
            .field("ocr", &self.ocr)
            .field("normalization", &self.normalization)
            .field("export", &self.export)
            .field("dedup", &self.dedup)
            .field("workers", &self.workers)
            .field("pdfium_library", &self.pdfium_library)
            .field("upload_dir", &self.upload_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective upload directory.
    pub fn resolved_upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pdf2sheet-uploads"))
    }
}

const DEFAULT_WORKERS: usize = 4;

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn prefer_tables(mut self, v: bool) -> Self {
        self.config.extraction.prefer_tables = v;
        self
    }

    pub fn ocr_fallback(mut self, v: bool) -> Self {
        self.config.extraction.ocr_fallback = v;
        self
    }

    pub fn ocr_max_pixels(mut self, px: u32) -> Self {
        self.config.extraction.ocr_max_pixels = px.max(100);
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.extraction.ocr_concurrency = n.max(1);
        self
    }

    pub fn min_table_rows(mut self, n: usize) -> Self {
        self.config.extraction.min_table_rows = n.max(1);
        self
    }

    pub fn min_table_columns(mut self, n: usize) -> Self {
        self.config.extraction.min_table_columns = n.max(2);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.ocr.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.ocr.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.ocr.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.ocr.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.ocr.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.ocr.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr.system_prompt = Some(prompt.into());
        self
    }

    pub fn date_order(mut self, order: DateOrder) -> Self {
        self.config.normalization.date_order = order;
        self
    }

    pub fn number_format(mut self, format: NumberFormat) -> Self {
        self.config.normalization.number_format = format;
        self
    }

    pub fn decimal_scale(mut self, scale: u32) -> Self {
        self.config.normalization.decimal_scale = scale.min(MAX_DECIMAL_SCALE);
        self
    }

    pub fn normalization(mut self, n: NormalizerConfig) -> Self {
        self.config.normalization = n;
        self
    }

    pub fn csv_delimiter(mut self, c: char) -> Self {
        self.config.export.csv_delimiter = c;
        self
    }

    pub fn include_header(mut self, v: bool) -> Self {
        self.config.export.include_header = v;
        self
    }

    pub fn xlsx_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.export.xlsx_sheet_name = name.into();
        self
    }

    pub fn remote_sheet(mut self, remote: RemoteSheetConfig) -> Self {
        self.config.export.remote = Some(remote);
        self
    }

    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.config.dedup = dedup;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn upload_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2SheetError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(Pdf2SheetError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        let d = c.export.csv_delimiter;
        if !d.is_ascii() || d == '"' || d == '\n' || d == '\r' {
            return Err(Pdf2SheetError::InvalidConfig(format!(
                "CSV delimiter must be a single ASCII character other than quote or newline, got {d:?}"
            )));
        }
        if c.normalization.decimal_scale > MAX_DECIMAL_SCALE {
            return Err(Pdf2SheetError::InvalidConfig(format!(
                "Decimal scale must be 0–{MAX_DECIMAL_SCALE}, got {}",
                c.normalization.decimal_scale
            )));
        }
        if let Some(remote) = &c.export.remote {
            if !(remote.endpoint.starts_with("http://") || remote.endpoint.starts_with("https://")) {
                return Err(Pdf2SheetError::InvalidConfig(format!(
                    "Remote sheet endpoint must be an HTTP(S) URL, got '{}'",
                    remote.endpoint
                )));
            }
            if remote.spreadsheet_id.trim().is_empty() {
                return Err(Pdf2SheetError::InvalidConfig(
                    "Remote sheet requires a spreadsheet id".into(),
                ));
            }
            if remote.max_attempts == 0 {
                return Err(Pdf2SheetError::InvalidConfig(
                    "Remote sheet max_attempts must be ≥ 1".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

const MAX_DECIMAL_SCALE: u32 = 10;

/// Longest single wait between two retries.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Wait before retry `retry` (1-based): `base_ms * 2^(retry - 1)`, saturating
/// and capped at [`MAX_RETRY_BACKOFF_MS`].
pub fn retry_backoff(base_ms: u64, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS))
}

// ── Sections ─────────────────────────────────────────────────────────────

/// How the extraction stage picks a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Look for table structure in the text layer. Default: true.
    pub prefer_tables: bool,

    /// OCR documents without a text layer. Default: true.
    pub ocr_fallback: bool,

    /// Longest rendered edge for OCR input, in pixels. Default: 2000.
    pub ocr_max_pixels: u32,

    /// Pages sent to the OCR engine at once. Default: 4.
    pub ocr_concurrency: usize,

    /// Consecutive aligned lines needed to call something a table. Default: 2.
    pub min_table_rows: usize,

    /// Cells per line needed to call it a table row. Default: 2.
    pub min_table_columns: usize,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            prefer_tables: true,
            ocr_fallback: true,
            ocr_max_pixels: 2000,
            ocr_concurrency: 4,
            min_table_rows: 2,
            min_table_columns: 2,
        }
    }
}

/// Vision-model settings for the OCR fallback.
#[derive(Clone)]
pub struct OcrConfig {
    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a failed OCR call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom transcription prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// Locale rules applied by [`crate::pipeline::normalize::Normalizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Reading of ambiguous numeric dates such as `03/04/2024`.
    pub date_order: DateOrder,

    /// Decimal separator convention for amounts.
    pub number_format: NumberFormat,

    /// Fractional digits kept on decimal values. Default: 2.
    pub decimal_scale: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            date_order: DateOrder::default(),
            number_format: NumberFormat::default(),
            decimal_scale: 2,
        }
    }
}

/// Sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Field separator for the CSV sink. Default: `,`.
    pub csv_delimiter: char,

    /// Write a header row in CSV output. Default: true.
    pub include_header: bool,

    /// Worksheet name in Excel output. Default: `Data`.
    pub xlsx_sheet_name: String,

    /// Remote spreadsheet target. Required for [`OutputFormat::Sheet`].
    pub remote: Option<RemoteSheetConfig>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: ',',
            include_header: true,
            xlsx_sheet_name: "Data".into(),
            remote: None,
        }
    }
}

/// Target for the remote spreadsheet sink.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSheetConfig {
    /// API base URL, e.g. `https://sheets.googleapis.com/v4`.
    pub endpoint: String,

    pub spreadsheet_id: String,

    /// A1-notation range rows are appended to. Default: `Sheet1!A1`.
    pub range: String,

    /// Bearer token sent with every request.
    pub token: Option<String>,

    /// Attempts before falling back to the local backup. Default: 3.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 30.
    pub timeout_secs: u64,

    /// Send the header row with the first append of a run; later appends
    /// carry data rows only. Default: true.
    pub include_header: bool,
}

impl Default for RemoteSheetConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://sheets.googleapis.com/v4".into(),
            spreadsheet_id: String::new(),
            range: "Sheet1!A1".into(),
            token: None,
            max_attempts: 3,
            retry_backoff_ms: 500,
            timeout_secs: 30,
            include_header: true,
        }
    }
}

impl fmt::Debug for RemoteSheetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSheetConfig")
            .field("endpoint", &self.endpoint)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("range", &self.range)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("include_header", &self.include_header)
            .finish()
    }
}

/// Record deduplication applied to a document's valid records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,

    /// Fields that identify a record. Empty compares whole records.
    pub key_fields: Vec<String>,

    pub keep: KeepPolicy,
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Reading of numeric dates where both day and month are ≤ 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    /// `03/04/2024` is 4 March.
    #[default]
    MonthFirst,
    /// `03/04/2024` is 3 April.
    DayFirst,
}

/// Decimal separator convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormat {
    /// Infer per value: the right-most of `.`/`,` is the decimal point when
    /// both appear; a lone separator followed by exactly three digits is a
    /// thousands separator.
    #[default]
    Auto,
    /// `1,234.56`
    Dot,
    /// `1.234,56`
    Comma,
}

/// Which duplicate survives deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepPolicy {
    #[default]
    First,
    Last,
}

/// Output sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Flat delimited file.
    #[default]
    Csv,
    /// Structured JSON array.
    Json,
    /// Excel workbook with typed cells.
    Xlsx,
    /// Remote spreadsheet, with a local CSV backup on failure.
    Sheet,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Sheet => "sheet",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = Pdf2SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "xlsx" | "excel" => Ok(OutputFormat::Xlsx),
            "sheet" | "gsheet" | "remote" => Ok(OutputFormat::Sheet),
            other => Err(Pdf2SheetError::InvalidConfig(format!(
                "unknown output format '{other}' (expected csv, json, xlsx or sheet)"
            ))),
        }
    }
}
