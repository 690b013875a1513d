//! CLI binary for edgequake-pdf2sheet.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` + `ProcessOptions` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2sheet::logging::LogLineFormat;
use edgequake_pdf2sheet::{
    DateOrder, DedupConfig, DocumentResult, KeepPolicy, NoopProgressCallback, NumberFormat,
    OutputFormat, Pdf2SheetError, Pipeline, PipelineConfig, PipelineProgressCallback, ProcessOptions,
    RemoteSheetConfig, RunSummary, Stage, TemplateRegistry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch, one log line per finished document.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_documents} PDF files"))
        ));
    }

    fn on_document_start(&self, _index: usize, total: usize, name: &str) {
        if total == 1 {
            self.bar.set_length(1);
        }
        self.bar.set_message(name.to_string());
    }

    fn on_stage(&self, name: &str, stage: Stage) {
        self.bar.set_message(format!("{name}: {stage}"));
    }

    fn on_document_complete(&self, result: &DocumentResult) {
        let elapsed = dim(&format!("{:.1}s", result.elapsed_ms as f64 / 1000.0));
        match &result.error {
            None => self.bar.println(format!(
                "  {} {:<32} {:<16} {}  {}",
                green("✓"),
                result.name,
                result.parser.as_deref().unwrap_or("-"),
                dim(&format!(
                    "{:>4} rows, {} invalid",
                    result.rows_exported, result.error_count
                )),
                elapsed,
            )),
            Some(e) => {
                let msg = e.to_string();
                let msg = if msg.chars().count() > 80 {
                    format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
                } else {
                    msg
                };
                self.bar.println(format!(
                    "  {} {:<32} {}  {}",
                    red("✗"),
                    result.name,
                    red(&msg),
                    elapsed
                ));
            }
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _processed: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every PDF in a folder to CSV
  pdf2sheet invoices/ -o out/

  # One file, forced template, JSON output
  pdf2sheet factura.pdf -p invoice -f json -o out/

  # European formats: 15/03/2024 and 1.500,00
  pdf2sheet statements/ --day-first --decimal-comma

  # Append to a remote spreadsheet (local CSV backup on failure)
  pdf2sheet invoices/ -f sheet --sheet-id 1AbC... --sheet-token $TOKEN

  # Check templates and validation without writing anything
  pdf2sheet invoices/ --dry-run -v

  # Machine-readable summary, non-zero exit if any document failed
  pdf2sheet invoices/ --json --strict

EXIT CODES:
  0  run completed
  1  fatal error (missing input, unwritable output, bad configuration)
  2  --strict and at least one document failed

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (OCR fallback for scanned pages)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override OCR provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override OCR model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  PDF2SHEET_SHEET_TOKEN   Bearer token for the remote sheet
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Extract validated records from PDF documents into CSV, JSON or a remote sheet.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2sheet",
    version,
    about = "Extract validated records from PDF invoices and reports into spreadsheets",
    long_about = "Extract structured records from PDF invoices, financial statements and \
tabular reports. Each document is read through its text layer, detected tables or a vision \
model for scanned pages, matched to a template, normalised and validated before export.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file or directory of PDF files.
    #[arg(required_unless_present = "list_parsers")]
    input: Option<PathBuf>,

    /// Directory for result files.
    #[arg(short, long, env = "PDF2SHEET_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Output format.
    #[arg(short, long, env = "PDF2SHEET_FORMAT", value_enum, default_value = "csv")]
    format: FormatArg,

    /// Template id, or "auto" to detect per document.
    #[arg(short, long, env = "PDF2SHEET_PARSER", default_value = "auto")]
    parser: String,

    /// Run every stage except export.
    #[arg(long)]
    dry_run: bool,

    /// Never fall back to OCR for scanned pages.
    #[arg(long, env = "PDF2SHEET_NO_OCR")]
    no_ocr: bool,

    /// Skip table detection.
    #[arg(long)]
    no_tables: bool,

    /// Read ambiguous numeric dates as day/month.
    #[arg(long)]
    day_first: bool,

    /// Numbers use a decimal comma (1.500,00).
    #[arg(long)]
    decimal_comma: bool,

    /// CSV delimiter.
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Drop duplicate valid records.
    #[arg(long)]
    dedup: bool,

    /// Fields that identify a duplicate (default: all fields).
    #[arg(long, value_delimiter = ',', requires = "dedup")]
    dedup_key: Vec<String>,

    /// Keep the last duplicate instead of the first.
    #[arg(long, requires = "dedup")]
    dedup_keep_last: bool,

    /// Remote sheet API base URL.
    #[arg(long, env = "PDF2SHEET_SHEET_ENDPOINT")]
    sheet_endpoint: Option<String>,

    /// Remote spreadsheet id.
    #[arg(long, env = "PDF2SHEET_SHEET_ID")]
    sheet_id: Option<String>,

    /// Target range in the remote sheet.
    #[arg(long, default_value = "Sheet1!A1")]
    sheet_range: String,

    /// Bearer token for the remote sheet.
    #[arg(long, env = "PDF2SHEET_SHEET_TOKEN", hide_env_values = true)]
    sheet_token: Option<String>,

    /// Attempts per remote append before writing the local backup.
    #[arg(long, default_value_t = 3)]
    sheet_retries: u32,

    /// OCR model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// OCR provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2SHEET_NO_PROGRESS")]
    no_progress: bool,

    /// Exit with code 2 when any document failed.
    #[arg(long)]
    strict: bool,

    /// List registered templates and exit.
    #[arg(long)]
    list_parsers: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2SHEET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Json,
    Xlsx,
    Sheet,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Xlsx => OutputFormat::Xlsx,
            FormatArg::Sheet => OutputFormat::Sheet,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .event_format(LogLineFormat)
        .with_writer(io::stderr)
        .init();

    // ── List templates ───────────────────────────────────────────────────
    if cli.list_parsers {
        let registry = TemplateRegistry::with_builtin();
        for rule in registry.rules() {
            let fields: Vec<&str> = rule.schema().fields.iter().map(|f| f.name.as_str()).collect();
            println!("{:<18} {}", bold(&rule.id), rule.description);
            println!("{:<18} {}", "", dim(&fields.join(", ")));
        }
        return Ok(());
    }

    let Some(input) = cli.input.clone() else {
        anyhow::bail!("No input given");
    };
    let meta = tokio::fs::metadata(&input).await.map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            Pdf2SheetError::PermissionDenied {
                path: input.clone(),
            }
        } else {
            Pdf2SheetError::InputNotFound {
                path: input.clone(),
            }
        }
    })?;

    let config = build_config(&cli)?;
    let pipeline = Pipeline::new(config).context("Failed to initialise the pipeline")?;
    let opts = ProcessOptions {
        parser: Some(cli.parser.clone()),
        format: cli.format.into(),
        output_dir: cli.output.clone(),
        dry_run: cli.dry_run,
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress: &dyn PipelineProgressCallback = match &cli_progress {
        Some(cb) => cb,
        None => &NoopProgressCallback,
    };

    let summary = if meta.is_dir() {
        pipeline
            .process_directory_with_progress(&input, &opts, progress)
            .await
            .context("Run failed")?
    } else {
        opts.prepare_output_dir()
            .await
            .context("Output directory is not usable")?;
        let start = Instant::now();
        let result = pipeline
            .process_file_with_progress(&input, &opts, progress)
            .await;
        progress.on_batch_complete(1, usize::from(!result.is_success()));
        RunSummary::from_results(vec![result], start.elapsed().as_millis() as u64)
    };

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary, cli.dry_run);
    }

    if cli.strict && summary.documents_failed > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    let mark = if summary.documents_failed == 0 && summary.errors == 0 {
        green("✔")
    } else if summary.documents_failed == summary.documents_processed {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {}{}",
        mark,
        bold("Run complete"),
        if dry_run { dim("  (dry run, nothing written)") } else { String::new() }
    );
    eprintln!("{summary}");

    for doc in &summary.documents {
        for w in doc.output_warnings() {
            eprintln!("  {} {}: {}", cyan("⚠"), doc.name, w);
        }
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .prefer_tables(!cli.no_tables)
        .ocr_fallback(!cli.no_ocr)
        .date_order(if cli.day_first {
            DateOrder::DayFirst
        } else {
            DateOrder::MonthFirst
        })
        .number_format(if cli.decimal_comma {
            NumberFormat::Comma
        } else {
            NumberFormat::Auto
        })
        .csv_delimiter(cli.delimiter);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib.clone());
    }

    if cli.dedup {
        builder = builder.dedup(DedupConfig {
            enabled: true,
            key_fields: cli.dedup_key.clone(),
            keep: if cli.dedup_keep_last {
                KeepPolicy::Last
            } else {
                KeepPolicy::First
            },
        });
    }

    if matches!(cli.format, FormatArg::Sheet) {
        let sheet_id = cli
            .sheet_id
            .clone()
            .context("--format sheet requires --sheet-id")?;
        let mut remote = RemoteSheetConfig {
            spreadsheet_id: sheet_id,
            range: cli.sheet_range.clone(),
            token: cli.sheet_token.clone(),
            max_attempts: cli.sheet_retries,
            ..Default::default()
        };
        if let Some(ref endpoint) = cli.sheet_endpoint {
            remote.endpoint = endpoint.clone();
        }
        builder = builder.remote_sheet(remote);
    }

    builder.build().context("Invalid configuration")
}
