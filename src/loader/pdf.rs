//! Page-wise PDF text extraction via `lopdf`.
use lopdf::Document;
use tracing::{debug, warn};

use super::{DocumentFormat, LoadError, Section, TextExtractor};

pub struct PdfExtractor;

fn extraction_error(reason: impl Into<String>) -> LoadError {
    LoadError::Extraction {
        format: DocumentFormat::Pdf,
        reason: reason.into(),
    }
}

impl TextExtractor for PdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<Section>, LoadError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| extraction_error(format!("failed to load PDF: {e}")))?;

        let pages = doc.get_pages();
        debug!("PDF has {} pages", pages.len());

        let mut sections = Vec::with_capacity(pages.len());
        for page_number in pages.keys().copied() {
            match doc.extract_text(&[page_number]) {
                Ok(text) => {
                    let text = text.replace('\0', "");
                    if text.trim().is_empty() {
                        continue;
                    }
                    sections.push(Section {
                        label: Some(format!("page {page_number}")),
                        text,
                    });
                }
                // A single unreadable page (odd font encoding) should not sink the document
                Err(e) => warn!("Could not extract text from page {page_number}: {e}"),
            }
        }

        if sections.is_empty() && !pages.is_empty() {
            return Err(extraction_error(
                "no extractable text (image-only or encrypted PDF)",
            ));
        }

        Ok(sections)
    }
}
