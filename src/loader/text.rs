//! Plain text and markdown passthrough.
use super::{LoadError, Section, TextExtractor};

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<Section>, LoadError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = String::from_utf8_lossy(bytes).replace("\r\n", "\n");
        Ok(vec![Section::unlabeled(text)])
    }
}
