//! Input resolution: read a PDF from disk, or enumerate a directory of them.
//!
//! PDF magic bytes (`%PDF`) are checked before a document reaches pdfium so a
//! misnamed file is reported as "not a PDF" instead of a parser failure.

use crate::error::{ExtractionError, Pdf2SheetError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read `path` fully and check the PDF magic bytes.
pub async fn read_pdf(path: &Path) -> Result<Vec<u8>, ExtractionError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExtractionError::Io(format!("file not found: {}", path.display())),
        ErrorKind::PermissionDenied => {
            ExtractionError::Io(format!("permission denied: {}", path.display()))
        }
        _ => ExtractionError::Io(format!("{}: {e}", path.display())),
    })?;

    check_magic(&bytes)?;
    debug!("Read {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

/// Fail unless `bytes` starts with `%PDF`.
pub fn check_magic(bytes: &[u8]) -> Result<(), ExtractionError> {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    if &magic != b"%PDF" {
        return Err(ExtractionError::NotAPdf { magic });
    }
    Ok(())
}

/// `*.pdf` files (case-insensitive) directly inside `dir`, sorted by name.
pub async fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, Pdf2SheetError> {
    let meta = tokio::fs::metadata(dir).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => Pdf2SheetError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => Pdf2SheetError::InputNotFound {
            path: dir.to_path_buf(),
        },
    })?;
    if !meta.is_dir() {
        return Err(Pdf2SheetError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => Pdf2SheetError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => Pdf2SheetError::Internal(format!("reading {}: {e}", dir.display())),
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Pdf2SheetError::Internal(format!("reading {}: {e}", dir.display())))?
    {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name for display, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
