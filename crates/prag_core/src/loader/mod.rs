//! Discovers source files in a folder and turns each one into pages of text.
//!
//! Discovery is non-recursive: only regular files directly inside the folder are
//! considered, in file-name order. One unreadable file never stops the others; it is
//! yielded as a [`LoadFailure`] and iteration continues.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{sha256_hex, Page};
use crate::error::{codes, AppError};

pub mod pdf;

pub use pdf::PdfExtractor;

/// Turns the bytes of one file into per-page text. Index `i` of the result is page `i + 1`.
pub trait PageExtractor: Send + Sync {
    /// Lower-case extensions (without the dot) this extractor understands.
    fn extensions(&self) -> &[&'static str];

    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadedDocument {
    pub document_id: String,
    pub path: PathBuf,
    pub content_sha256: String,
    /// Pages in the file, including the ones skipped for having no text.
    pub page_count: u32,
    /// Pages with extractable text only.
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadFailure {
    pub document_id: String,
    pub path: PathBuf,
    pub error: AppError,
}

pub struct DocumentLoader {
    extractor: Box<dyn PageExtractor>,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(Box::new(PdfExtractor))
    }
}

impl DocumentLoader {
    pub fn new(extractor: Box<dyn PageExtractor>) -> Self {
        Self { extractor }
    }

    /// Supported files directly inside `dir`, sorted by file name.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
        if !dir.is_dir() {
            return Err(AppError::new(
                codes::LOAD_DIR_INVALID,
                "Documents directory does not exist or is not a directory",
            )
            .with_details(format!("path={}", dir.display())));
        }
        let entries = fs::read_dir(dir).map_err(|e| {
            AppError::new(codes::LOAD_DIR_INVALID, "Failed to list documents directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && self.supports(&path) {
                out.push(path);
            }
        }
        out.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(out)
    }

    pub fn load_dir(&self, dir: &Path) -> Result<DocumentIter<'_>, AppError> {
        let paths = self.discover(dir)?;
        Ok(self.load_paths(paths))
    }

    pub fn load_paths(&self, paths: Vec<PathBuf>) -> DocumentIter<'_> {
        DocumentIter {
            extractor: self.extractor.as_ref(),
            paths: paths.into_iter(),
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<LoadedDocument, LoadFailure> {
        load_one(self.extractor.as_ref(), path)
    }

    fn supports(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extractor.extensions().iter().any(|e| *e == ext)
    }
}

/// Lazy: each `next()` reads and parses exactly one file.
pub struct DocumentIter<'a> {
    extractor: &'a dyn PageExtractor,
    paths: std::vec::IntoIter<PathBuf>,
}

impl Iterator for DocumentIter<'_> {
    type Item = Result<LoadedDocument, LoadFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(load_one(self.extractor, &path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

/// The identifier a file is indexed and cited under: its file name.
pub fn document_id_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_one(extractor: &dyn PageExtractor, path: &Path) -> Result<LoadedDocument, LoadFailure> {
    let document_id = document_id_for(path);
    let fail = |error: AppError| LoadFailure {
        document_id: document_id.clone(),
        path: path.to_path_buf(),
        error,
    };

    let bytes = fs::read(path).map_err(|e| {
        fail(
            AppError::new(codes::LOAD_FAILED, "Failed to read document")
                .with_details(format!("path={}; err={}", path.display(), e)),
        )
    })?;
    let raw_pages = extractor.extract_pages(&bytes).map_err(|e| {
        tracing::warn!(document = %document_id, error = %e.reason(), "skipping unreadable document");
        fail(e)
    })?;

    let page_count = raw_pages.len().min(u32::MAX as usize) as u32;
    let mut pages = Vec::new();
    for (i, raw) in raw_pages.into_iter().enumerate() {
        let text = normalize_page_text(&raw);
        if text.is_empty() {
            continue;
        }
        pages.push(Page {
            document_id: document_id.clone(),
            page_number: i as u32 + 1,
            text,
        });
    }
    if pages.len() < page_count as usize {
        tracing::debug!(
            document = %document_id,
            skipped = page_count as usize - pages.len(),
            "skipped pages without extractable text"
        );
    }

    Ok(LoadedDocument {
        document_id,
        path: path.to_path_buf(),
        content_sha256: sha256_hex(&bytes),
        page_count,
        pages,
    })
}

/// CRLF/CR to LF, trimmed. An empty result means the page has no usable text.
pub fn normalize_page_text(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}
