//! Document loading: filename extension → extraction strategy.
//!
//! The format is chosen purely from the (case-insensitive) extension. Each
//! supported [`DocumentFormat`] maps to one [`TextExtractor`]; anything else
//! fails with [`LoadError::UnsupportedFormat`] before any bytes are parsed.
pub mod docx;
pub mod pdf;
pub mod spreadsheet;
pub mod text;

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to extract {format} content: {reason}")]
    Extraction {
        format: DocumentFormat,
        reason: String,
    },
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Text,
    Markdown,
    Docx,
    Xlsx,
    Xls,
}

impl DocumentFormat {
    /// Resolve the format from a bare extension (without the dot).
    pub fn from_extension(ext: &str) -> Result<Self, LoadError> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Text),
            "md" => Ok(Self::Markdown),
            "docx" => Ok(Self::Docx),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            other => Err(LoadError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    /// Resolve the format from a file name such as `report.PDF`.
    pub fn from_filename(name: &str) -> Result<Self, LoadError> {
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => Err(LoadError::UnsupportedFormat(format!(
                "{name} has no extension"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }

    fn extractor(&self) -> &'static dyn TextExtractor {
        match self {
            Self::Pdf => &pdf::PdfExtractor,
            Self::Text | Self::Markdown => &text::PlainTextExtractor,
            Self::Docx => &docx::DocxExtractor,
            Self::Xlsx => &spreadsheet::XLSX,
            Self::Xls => &spreadsheet::XLS,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structural sub-unit of a document (a PDF page, a spreadsheet sheet).
///
/// Formats without structure produce a single unlabeled section.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub label: Option<String>,
    pub text: String,
}

impl Section {
    #[must_use]
    pub fn unlabeled(text: String) -> Self {
        Self { label: None, text }
    }
}

/// Text extracted from one document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub format: DocumentFormat,
    pub sections: Vec<Section>,
}

impl ExtractedText {
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.sections.iter().all(|s| s.text.trim().is_empty())
    }
}

/// One extraction strategy.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<Section>, LoadError>;
}

/// Load a document: pick the strategy from `name`, extract text from `bytes`.
pub fn load(name: &str, bytes: &[u8]) -> Result<ExtractedText, LoadError> {
    let format = DocumentFormat::from_filename(name)?;
    debug!("Loading {name} as {format}");

    let sections = format.extractor().extract_text(bytes)?;
    Ok(ExtractedText { format, sections })
}
