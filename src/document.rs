//! Loaded documents and the backend that reads them.
//!
//! A [`Document`] is the immutable handle every stage works from: the raw
//! bytes plus what the backend learned when it first opened them (page
//! count, text layer, encryption). The [`PdfBackend`] trait is the seam
//! between the pipeline and the PDF engine; [`crate::pipeline::pdfium`]
//! provides the production implementation.

use crate::error::ExtractionError;
use image::DynamicImage;
use std::sync::Arc;

/// What a backend reports about a document without extracting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentInfo {
    pub page_count: usize,
    /// At least one page carries embedded (selectable) text.
    pub has_text_layer: bool,
    /// The document requires a password to open.
    pub encrypted: bool,
}

/// Access to a PDF engine.
///
/// All methods are blocking; the pipeline calls them from
/// `spawn_blocking`.
pub trait PdfBackend: Send + Sync {
    /// Open the bytes and report page count, text layer and encryption.
    ///
    /// Password-protected input must be reported as `encrypted: true`
    /// rather than as an error.
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ExtractionError>;

    /// Embedded text of every page, in page order. Pages without text
    /// yield empty strings.
    fn page_text(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;

    /// Render every page, capping the longest edge at `max_pixels`.
    fn rasterize(&self, bytes: &[u8], max_pixels: u32) -> Result<Vec<DynamicImage>, ExtractionError>;
}

/// An opened document. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    bytes: Arc<[u8]>,
    info: DocumentInfo,
}

impl Document {
    /// Inspect `bytes` with `backend` and build the handle.
    ///
    /// Runs the backend on the blocking pool.
    pub async fn load(
        backend: Arc<dyn PdfBackend>,
        name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ExtractionError> {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let shared = Arc::clone(&bytes);
        let info = tokio::task::spawn_blocking(move || backend.inspect(&shared))
            .await
            .map_err(|e| ExtractionError::Unreadable {
                detail: format!("inspect task panicked: {e}"),
            })??;
        Ok(Self {
            name: name.into(),
            bytes,
            info,
        })
    }

    /// Build a handle from already-known facts.
    pub fn from_parts(name: impl Into<String>, bytes: Arc<[u8]>, info: DocumentInfo) -> Self {
        Self {
            name: name.into(),
            bytes,
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.info.page_count
    }

    pub fn has_text_layer(&self) -> bool {
        self.info.has_text_layer
    }

    pub fn is_encrypted(&self) -> bool {
        self.info.encrypted
    }

    pub fn info(&self) -> DocumentInfo {
        self.info
    }
}
