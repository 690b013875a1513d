//! Shared fixtures: a JSON-backed fake PDF engine, a scripted OCR engine and
//! a remote sheet transport that fails on demand.
//!
//! A fake PDF is `%PDF-fake\n` followed by
//! `{"pages": [...], "encrypted": false, "scanned": false}`.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdf2sheet::export::TransportError;
use edgequake_pdf2sheet::pipeline::ocr::OcrPage;
use edgequake_pdf2sheet::{
    DocumentInfo, ExtractionError, OcrEngine, PdfBackend, Pipeline, PipelineConfig,
    RemoteSheetConfig, SheetTransport,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HEADER: &[u8] = b"%PDF-fake\n";

#[derive(Debug, Default, Serialize, Deserialize)]
struct FakePdf {
    pages: Vec<String>,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    scanned: bool,
}

fn encode(pdf: &FakePdf) -> Vec<u8> {
    let mut bytes = HEADER.to_vec();
    bytes.extend(serde_json::to_vec(pdf).unwrap());
    bytes
}

fn write(dir: &Path, name: &str, pdf: &FakePdf) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, encode(pdf)).unwrap();
    path
}

/// A PDF whose pages carry a text layer.
pub fn write_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    write(
        dir,
        name,
        &FakePdf {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
    )
}

pub fn write_encrypted(dir: &Path, name: &str) -> PathBuf {
    write(
        dir,
        name,
        &FakePdf {
            pages: vec!["secret".into()],
            encrypted: true,
            ..Default::default()
        },
    )
}

/// A PDF of image-only pages.
pub fn write_scanned(dir: &Path, name: &str, pages: usize) -> PathBuf {
    write(
        dir,
        name,
        &FakePdf {
            pages: vec![String::new(); pages],
            scanned: true,
            ..Default::default()
        },
    )
}

/// Bytes of a fake text PDF, for uploads.
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    encode(&FakePdf {
        pages: pages.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    })
}

/// Reads fake PDFs. `delay` slows every call down so tests can act while a
/// document is in flight.
#[derive(Default)]
pub struct FakeBackend {
    pub delay: Option<Duration>,
}

impl FakeBackend {
    fn parse(&self, bytes: &[u8]) -> Result<FakePdf, ExtractionError> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let body = bytes
            .strip_prefix(HEADER)
            .ok_or_else(|| ExtractionError::Unreadable {
                detail: "missing fake header".into(),
            })?;
        serde_json::from_slice(body).map_err(|e| ExtractionError::Unreadable {
            detail: e.to_string(),
        })
    }
}

impl PdfBackend for FakeBackend {
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ExtractionError> {
        let pdf = self.parse(bytes)?;
        Ok(DocumentInfo {
            page_count: pdf.pages.len(),
            has_text_layer: !pdf.scanned && pdf.pages.iter().any(|p| !p.trim().is_empty()),
            encrypted: pdf.encrypted,
        })
    }

    fn page_text(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let pdf = self.parse(bytes)?;
        Ok(if pdf.scanned {
            vec![String::new(); pdf.pages.len()]
        } else {
            pdf.pages
        })
    }

    fn rasterize(&self, bytes: &[u8], _max_pixels: u32) -> Result<Vec<DynamicImage>, ExtractionError> {
        let pdf = self.parse(bytes)?;
        Ok(pdf.pages.iter().map(|_| DynamicImage::new_rgb8(8, 8)).collect())
    }
}

/// Returns `pages[page_num - 1]` and counts every call.
pub struct FakeOcr {
    pages: Vec<String>,
    pub calls: AtomicUsize,
}

impl FakeOcr {
    pub fn new(pages: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, page_num: usize, _image: &DynamicImage) -> Result<OcrPage, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrPage {
            text: self.pages.get(page_num - 1).cloned().unwrap_or_default(),
            confidence: 0.8,
        })
    }
}

/// Panics on every page, standing in for a bug inside an engine.
pub struct PanickingOcr;

#[async_trait]
impl OcrEngine for PanickingOcr {
    async fn recognize(&self, page_num: usize, _image: &DynamicImage) -> Result<OcrPage, ExtractionError> {
        panic!("engine crashed on page {page_num}");
    }
}

/// Fails the first `failures` appends with a transient error.
pub struct FlakyTransport {
    failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetTransport for FlakyTransport {
    async fn append(
        &self,
        target: &RemoteSheetConfig,
        values: &[Vec<String>],
    ) -> Result<String, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(TransportError::transient("HTTP 503 Service Unavailable"));
        }
        Ok(format!("{}/Sheet1!A1:Z{}", target.spreadsheet_id, values.len()))
    }
}

/// Pipeline over [`FakeBackend`] with OCR disabled.
pub fn pipeline(config: PipelineConfig) -> Pipeline {
    Pipeline::builder(config)
        .backend(Arc::new(FakeBackend::default()))
        .without_ocr()
        .build()
        .unwrap()
}

pub const INVOICE_PAGE_1: &str = "INVOICE\nInvoice No: 12345\nDate: 03/15/2024\nVendor: ACME Corp";
pub const INVOICE_PAGE_2: &str = "Thank you for your business\nTotal: $1,500.00";

/// A single-page invoice with the given number and total.
pub fn invoice_text(id: &str, total: &str) -> String {
    format!("INVOICE\nInvoice No: {id}\nDate: 2024-01-10\nVendor: Beta Supplies\nTotal: {total}")
}
