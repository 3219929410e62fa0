//! Spreadsheet extraction via `calamine` (xlsx and legacy xls).
//!
//! Each sheet becomes one section; rows are rendered as ` | `-separated
//! cells, fully empty rows are skipped.
use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use tracing::warn;

use super::{DocumentFormat, LoadError, Section, TextExtractor};

/// Errors are labelled with the format the file was resolved to.
pub struct SpreadsheetExtractor {
    pub format: DocumentFormat,
}

pub static XLSX: SpreadsheetExtractor = SpreadsheetExtractor {
    format: DocumentFormat::Xlsx,
};

pub static XLS: SpreadsheetExtractor = SpreadsheetExtractor {
    format: DocumentFormat::Xls,
};

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{e:?}"),
    }
}

/// Render rows of cells as text lines.
fn render_rows<'a>(rows: impl Iterator<Item = &'a [Data]>) -> String {
    let mut out = String::new();
    for row in rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        out.push_str(&cells.join(" | "));
        out.push('\n');
    }
    out
}

impl TextExtractor for SpreadsheetExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<Section>, LoadError> {
        let mut workbook =
            open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| LoadError::Extraction {
                format: self.format,
                reason: e.to_string(),
            })?;

        let mut sections = Vec::new();
        for sheet in workbook.sheet_names() {
            match workbook.worksheet_range(&sheet) {
                Ok(range) => {
                    let text = render_rows(range.rows());
                    if text.is_empty() {
                        continue;
                    }
                    sections.push(Section {
                        label: Some(format!("sheet {sheet}")),
                        text,
                    });
                }
                Err(e) => warn!("Skipping unreadable sheet {sheet}: {e}"),
            }
        }

        Ok(sections)
    }
}
