//! Progress-callback trait for per-document pipeline events.
//!
//! Pass a `&dyn PipelineProgressCallback` to
//! [`crate::process::Pipeline::process_directory_with_progress`] (or the
//! single-file variant) to receive events as each document moves through
//! the stages. A shared [`ProgressCallback`] is passed as `&*callback`. The
//! job manager uses the same trait to drive job progress.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2sheet::{PipelineProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     exported: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage(&self, name: &str, stage: Stage) {
//!         if stage == Stage::Export {
//!             self.exported.fetch_add(1, Ordering::SeqCst);
//!             eprintln!("{name}: exporting");
//!         }
//!     }
//! }
//! ```

use crate::error::Stage;
use crate::output::DocumentResult;
use std::sync::Arc;

/// Called by the pipeline as it processes documents.
///
/// All methods have no-op defaults so callers only override what they care
/// about. Implementations must be `Send + Sync`: the job manager reports
/// from several worker tasks at once.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before the first document of a directory run.
    ///
    /// # Arguments
    /// * `total_documents`: number of PDF files found
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document is picked up.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in the batch (1 for single files)
    /// * `total`: batch size
    /// * `name`: display name of the document
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called before each stage runs for a document.
    fn on_stage(&self, name: &str, stage: Stage) {
        let _ = (name, stage);
    }

    /// Called with the final result of a document, success or not.
    fn on_document_complete(&self, result: &DocumentResult) {
        let _ = result;
    }

    /// Called once after every document of a directory run was attempted.
    ///
    /// # Arguments
    /// * `processed`: documents attempted
    /// * `failed`: documents that ended with a document-level error
    fn on_batch_complete(&self, processed: usize, failed: usize) {
        let _ = (processed, failed);
    }
}

/// A no-op implementation, used when no callback is supplied.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
