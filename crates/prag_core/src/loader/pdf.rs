use lopdf::Document;

use super::PageExtractor;
use crate::error::{codes, AppError};

/// Text-layer extraction with `lopdf`. Scanned pages without a text layer come back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl PageExtractor for PdfExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, AppError> {
        let doc = Document::load_mem(bytes).map_err(|e| {
            AppError::new(codes::LOAD_FAILED, "Failed to parse PDF").with_details(e.to_string())
        })?;
        if doc.is_encrypted() {
            return Err(AppError::new(
                codes::LOAD_FAILED,
                "PDF is encrypted; text extraction is not supported",
            ));
        }

        let pages = doc.get_pages();
        let mut out = Vec::with_capacity(pages.len());
        for number in pages.keys() {
            // One unreadable page leaves a hole rather than failing the whole document.
            let text = match doc.extract_text(&[*number]) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(page = *number, error = %e, "failed to extract page text");
                    String::new()
                }
            };
            out.push(text);
        }
        Ok(out)
    }
}
