//! Pipeline stages for PDF-to-record extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. [`crate::process::Pipeline`] sequences them per document.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pdfium ──▶ extract ──▶ (templates) ──▶ normalize ──▶ validate
//! (bytes)   (pages)    text/table/ocr  (Record)      (typed)      (report)
//! ```
//!
//! 1. [`input`]: read a file, check the PDF magic, list a directory
//! 2. [`pdfium`]: the production [`crate::document::PdfBackend`]; all calls
//!    are blocking and run in `spawn_blocking`; [`layout`] rebuilds each
//!    page's lines from character boxes
//! 3. [`extract`]: strategy selection; [`tables`] finds column-aligned
//!    tables, [`ocr`] reads scanned pages through a vision model
//! 4. [`normalize`]: raw strings to dates, decimals, integers, clean strings
//! 5. [`validate`]: schema constraints and record-level checks

pub mod extract;
pub mod input;
pub mod layout;
pub mod normalize;
pub mod ocr;
pub mod pdfium;
pub mod tables;
pub mod validate;
