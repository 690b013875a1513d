//! Extraction engine selector: turn a [`Document`] into an [`ExtractionResult`].
//!
//! Strategy order, first success wins:
//!
//! ```text
//! encrypted?            → ExtractionError::Encrypted
//! zero pages?           → ExtractionError::Empty
//! text layer            → page text
//!   └─ prefer_tables    → table detection; tables found → `table`, else `text`
//! no text layer + OCR   → rasterise → OcrEngine per page → `ocr` (degraded)
//! nothing               → ExtractionError::NoContent
//! ```
//!
//! A document with a text layer never reaches the OCR engine, even when the
//! text layer turns out to be empty.

use crate::config::ExtractionOptions;
use crate::document::{Document, PdfBackend};
use crate::error::ExtractionError;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::tables::detect_tables;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confidence assigned to text read from an embedded text layer.
const TEXT_LAYER_CONFIDENCE: f32 = 1.0;

/// Which strategy produced an [`ExtractionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    Text,
    Table,
    Ocr,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Text => "text",
            ExtractionStrategy::Table => "table",
            ExtractionStrategy::Ocr => "ocr",
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The text of one page as blank-line separated blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page: usize,
    pub blocks: Vec<String>,
}

/// A detected table: rows of cell strings, first row usually the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// 1-indexed page the table was found on.
    pub page: usize,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        self.rows.get(1..).unwrap_or(&[])
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Strategy-tagged intermediate content of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub strategy: ExtractionStrategy,
    pub pages: Vec<PageText>,
    pub tables: Vec<Table>,
    /// In `[0, 1]`.
    pub confidence: f32,
    /// Set for OCR output.
    pub degraded: bool,
}

impl ExtractionResult {
    /// Build a result from raw per-page strings (index 0 = page 1).
    pub fn from_page_texts(strategy: ExtractionStrategy, texts: &[String]) -> Self {
        let pages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page: i + 1,
                blocks: split_blocks(text),
            })
            .collect();
        Self {
            strategy,
            pages,
            tables: Vec::new(),
            confidence: TEXT_LAYER_CONFIDENCE,
            degraded: false,
        }
    }

    /// All blocks of all pages joined with newlines.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_content(&self) -> bool {
        !self.tables.is_empty() || self.pages.iter().any(|p| !p.blocks.is_empty())
    }

    /// Run table detection over every page and store the tables.
    fn detect_tables(&mut self, opts: &ExtractionOptions) {
        self.tables = self
            .pages
            .iter()
            .flat_map(|p| {
                detect_tables(
                    p.page,
                    &p.blocks.join("\n\n"),
                    opts.min_table_rows,
                    opts.min_table_columns,
                )
            })
            .collect();
    }
}

/// Split page text into blocks at blank lines, trimming trailing whitespace.
fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Chooses and runs an extraction strategy.
#[derive(Clone)]
pub struct ExtractionEngine {
    backend: Arc<dyn PdfBackend>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl ExtractionEngine {
    pub fn new(backend: Arc<dyn PdfBackend>, ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { backend, ocr }
    }

    pub fn backend(&self) -> &Arc<dyn PdfBackend> {
        &self.backend
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }

    /// Extract content from `doc` following the strategy order above.
    pub async fn extract(
        &self,
        doc: &Document,
        opts: &ExtractionOptions,
    ) -> Result<ExtractionResult, ExtractionError> {
        if doc.is_encrypted() {
            return Err(ExtractionError::Encrypted);
        }
        if doc.page_count() == 0 {
            return Err(ExtractionError::Empty);
        }

        if doc.has_text_layer() {
            let texts = self.page_text(doc).await?;
            let mut result = ExtractionResult::from_page_texts(ExtractionStrategy::Text, &texts);
            if opts.prefer_tables {
                result.detect_tables(opts);
                if !result.tables.is_empty() {
                    result.strategy = ExtractionStrategy::Table;
                }
            }
            if !result.has_content() {
                return Err(ExtractionError::NoContent);
            }
            info!(
                "{}: extracted via {} ({} pages, {} tables)",
                doc.name(),
                result.strategy,
                result.pages.len(),
                result.tables.len()
            );
            return Ok(result);
        }

        if opts.ocr_fallback {
            match &self.ocr {
                Some(ocr) => {
                    let result = self.run_ocr(doc, ocr, opts).await?;
                    if result.has_content() {
                        info!(
                            "{}: extracted via ocr ({} pages, confidence {:.2})",
                            doc.name(),
                            result.pages.len(),
                            result.confidence
                        );
                        return Ok(result);
                    }
                }
                None => warn!("{}: no text layer and no OCR engine configured", doc.name()),
            }
        } else {
            debug!("{}: no text layer, OCR fallback disabled", doc.name());
        }

        Err(ExtractionError::NoContent)
    }

    async fn page_text(&self, doc: &Document) -> Result<Vec<String>, ExtractionError> {
        let backend = Arc::clone(&self.backend);
        let bytes = Arc::clone(doc.bytes());
        tokio::task::spawn_blocking(move || backend.page_text(&bytes))
            .await
            .map_err(|e| ExtractionError::Unreadable {
                detail: format!("text task panicked: {e}"),
            })?
    }

    async fn run_ocr(
        &self,
        doc: &Document,
        ocr: &Arc<dyn OcrEngine>,
        opts: &ExtractionOptions,
    ) -> Result<ExtractionResult, ExtractionError> {
        let backend = Arc::clone(&self.backend);
        let bytes = Arc::clone(doc.bytes());
        let max_pixels = opts.ocr_max_pixels;
        let images = tokio::task::spawn_blocking(move || backend.rasterize(&bytes, max_pixels))
            .await
            .map_err(|e| ExtractionError::Unreadable {
                detail: format!("render task panicked: {e}"),
            })??;

        let total = images.len();
        info!("{}: no text layer, running OCR on {} pages", doc.name(), total);

        // `buffered` keeps page order while running calls concurrently.
        let outcomes: Vec<_> = stream::iter(images.into_iter().enumerate())
            .map(|(idx, image)| {
                let ocr = Arc::clone(ocr);
                async move { ocr.recognize(idx + 1, &image).await }
            })
            .buffered(opts.ocr_concurrency.max(1))
            .collect()
            .await;

        let mut texts = Vec::with_capacity(total);
        let mut confidence_sum = 0.0f32;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(page) => {
                    confidence_sum += page.confidence.clamp(0.0, 1.0);
                    texts.push(page.text);
                }
                Err(e) => {
                    warn!("{}: {}", doc.name(), e);
                    first_error.get_or_insert(e);
                    texts.push(String::new());
                }
            }
        }

        if let Some(err) = first_error {
            if total > 0 && texts.iter().all(String::is_empty) {
                return Err(err);
            }
        }

        let mut result = ExtractionResult::from_page_texts(ExtractionStrategy::Ocr, &texts);
        result.degraded = true;
        result.confidence = if total == 0 {
            0.0
        } else {
            confidence_sum / total as f32
        };
        if opts.prefer_tables {
            result.detect_tables(opts);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_split_on_blank_lines() {
        let blocks = split_blocks("Title\n\nLine one  \nLine two\n\n\n Tail ");
        assert_eq!(blocks, vec!["Title", "Line one\nLine two", " Tail"]);
    }

    #[test]
    fn full_text_spans_pages() {
        let r = ExtractionResult::from_page_texts(
            ExtractionStrategy::Text,
            &["Invoice No: 1".into(), "".into(), "Total: 5".into()],
        );
        assert_eq!(r.pages.len(), 3);
        assert!(r.pages[1].blocks.is_empty());
        assert_eq!(r.full_text(), "Invoice No: 1\nTotal: 5");
        assert!(r.has_content());
    }

    #[test]
    fn empty_pages_have_no_content() {
        let r = ExtractionResult::from_page_texts(ExtractionStrategy::Text, &["  \n".into()]);
        assert!(!r.has_content());
    }

    #[test]
    fn table_accessors() {
        let t = Table {
            page: 1,
            rows: vec![
                vec!["a".into(), "b".into()],
                vec!["1".into(), "2".into(), "3".into()],
            ],
        };
        assert_eq!(t.header().unwrap(), ["a", "b"]);
        assert_eq!(t.data_rows().len(), 1);
        assert_eq!(t.column_count(), 3);
    }
}
