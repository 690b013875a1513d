//! [`PdfBackend`] implementation on pdfium.
//!
//! pdfium is a blocking C library; every method here runs inside
//! `spawn_blocking` (see [`crate::document::Document::load`] and
//! [`crate::pipeline::extract`]). A binding is created per call, so the
//! backend itself only holds the library location.
//!
//! Page text is rebuilt from character boxes by
//! [`crate::pipeline::layout`] so column gaps survive as tabs.
//!
//! Library lookup order: explicit path, `PDFIUM_LIB_PATH`, the working
//! directory, then the system library path.

use crate::document::{DocumentInfo, PdfBackend};
use crate::error::{ExtractionError, Pdf2SheetError};
use crate::pipeline::layout::{layout_lines, Glyph};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// pdfium-backed document reader.
#[derive(Debug, Clone)]
pub struct PdfiumBackend {
    library: Option<PathBuf>,
}

impl PdfiumBackend {
    /// Locate pdfium and verify it can be bound.
    pub fn new(library: Option<PathBuf>) -> Result<Self, Pdf2SheetError> {
        let library = library.or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));
        let backend = Self { library };
        backend
            .bind()
            .map_err(|e| Pdf2SheetError::PdfiumBindingFailed(format!("{e:?}")))?;
        info!(
            "pdfium bound ({})",
            backend
                .library
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default search path".into())
        );
        Ok(backend)
    }

    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(&library_file(path))?,
            None => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())?,
        };
        Ok(Pdfium::new(bindings))
    }

    fn bind_for_document(&self) -> Result<Pdfium, ExtractionError> {
        self.bind().map_err(|e| ExtractionError::Unreadable {
            detail: format!("pdfium unavailable: {e:?}"),
        })
    }
}

/// Accept either the library file itself or the directory containing it.
fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

/// Every positioned character on a page; characters without a box are
/// skipped.
fn page_glyphs(text: &PdfPageText) -> Vec<Glyph> {
    let mut glyphs = Vec::new();
    for char_info in text.chars().iter() {
        let Some(ch) = char_info.unicode_string().and_then(|s| s.chars().next()) else {
            continue;
        };
        if let Ok(bounds) = char_info.loose_bounds() {
            glyphs.push(Glyph {
                ch,
                left: bounds.left().value,
                right: bounds.right().value,
                bottom: bounds.bottom().value,
                top: bounds.top().value,
            });
        }
    }
    glyphs
}

fn open_error(e: PdfiumError) -> ExtractionError {
    let err_str = format!("{e:?}");
    let lower = err_str.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::Encrypted
    } else {
        ExtractionError::Unreadable { detail: err_str }
    }
}

impl PdfBackend for PdfiumBackend {
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ExtractionError> {
        let pdfium = self.bind_for_document()?;
        let document = match pdfium.load_pdf_from_byte_slice(bytes, None) {
            Ok(doc) => doc,
            Err(e) => {
                return match open_error(e) {
                    ExtractionError::Encrypted => Ok(DocumentInfo {
                        page_count: 0,
                        has_text_layer: false,
                        encrypted: true,
                    }),
                    other => Err(other),
                }
            }
        };

        let pages = document.pages();
        let page_count = pages.len() as usize;
        let mut has_text_layer = false;
        for page in pages.iter() {
            if let Ok(text) = page.text() {
                if !text.all().trim().is_empty() {
                    has_text_layer = true;
                    break;
                }
            }
        }
        debug!("PDF inspected: {} pages, text layer: {}", page_count, has_text_layer);

        Ok(DocumentInfo {
            page_count,
            has_text_layer,
            encrypted: false,
        })
    }

    fn page_text(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let pdfium = self.bind_for_document()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(open_error)?;

        let mut texts = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page.text().map_err(|e| ExtractionError::Unreadable {
                detail: format!("page {}: {e:?}", idx + 1),
            })?;
            let glyphs = page_glyphs(&text);
            if glyphs.is_empty() {
                texts.push(text.all());
            } else {
                texts.push(layout_lines(&glyphs));
            }
        }
        Ok(texts)
    }

    fn rasterize(&self, bytes: &[u8], max_pixels: u32) -> Result<Vec<DynamicImage>, ExtractionError> {
        let pdfium = self.bind_for_document()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(open_error)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut images = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| ExtractionError::Rasterisation {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }
        Ok(images)
    }
}
