//! Word document extraction via `docx-rs`.
//!
//! Paragraph text is emitted one paragraph per line; table cells are
//! flattened row by row with ` | ` separators. Nested tables collapse into
//! their enclosing cell.
use docx_rs::{
    DocumentChild, InsertChild, Paragraph, ParagraphChild, Run, RunChild, StructuredDataTag,
    StructuredDataTagChild, Table, TableCellContent, TableChild, TableRowChild,
};

use super::{DocumentFormat, LoadError, Section, TextExtractor};

pub struct DocxExtractor;

fn run_text(run: &Run, out: &mut String) {
    for run_child in &run.children {
        match run_child {
            RunChild::Text(t) => out.push_str(&t.text),
            RunChild::Tab(_) => out.push('\t'),
            RunChild::Break(_) => out.push('\n'),
            _ => {}
        }
    }
}

/// Inline text of paragraph children, including hyperlinks, tracked
/// insertions and inline content controls. Deleted text is skipped.
fn inline_text(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => run_text(run, out),
            ParagraphChild::Hyperlink(link) => inline_text(&link.children, out),
            ParagraphChild::Insert(insert) => {
                for c in &insert.children {
                    if let InsertChild::Run(run) = c {
                        run_text(run, out);
                    }
                }
            }
            ParagraphChild::StructuredDataTag(tag) => tag_text(tag, out),
            _ => {}
        }
    }
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    inline_text(&paragraph.children, &mut text);
    text
}

/// Content control: runs stay inline, block children get their own lines.
fn tag_text(tag: &StructuredDataTag, out: &mut String) {
    for child in &tag.children {
        match child {
            StructuredDataTagChild::Run(run) => run_text(run, out),
            StructuredDataTagChild::Paragraph(p) => {
                out.push_str(&paragraph_text(p));
                out.push('\n');
            }
            StructuredDataTagChild::Table(t) => table_text(t, out),
            StructuredDataTagChild::StructuredDataTag(inner) => tag_text(inner, out),
            _ => {}
        }
    }
}

fn cell_text(children: &[TableCellContent]) -> String {
    let mut parts = Vec::new();
    for c in children {
        match c {
            TableCellContent::Paragraph(p) => parts.push(paragraph_text(p)),
            TableCellContent::Table(t) => {
                let mut nested = String::new();
                table_text(t, &mut nested);
                parts.push(nested.trim_end().replace('\n', " ; "));
            }
            TableCellContent::StructuredDataTag(tag) => {
                let mut inner = String::new();
                tag_text(tag, &mut inner);
                parts.push(inner.trim_end().to_string());
            }
            _ => {}
        }
    }
    parts.join(" ")
}

fn table_text(table: &Table, out: &mut String) {
    for TableChild::TableRow(row) in &table.rows {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|TableRowChild::TableCell(cell)| cell_text(&cell.children))
            .collect();
        if cells.iter().any(|c| !c.trim().is_empty()) {
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
    }
}

impl TextExtractor for DocxExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<Section>, LoadError> {
        let doc = docx_rs::read_docx(bytes).map_err(|e| LoadError::Extraction {
            format: DocumentFormat::Docx,
            reason: e.to_string(),
        })?;

        let mut text = String::new();
        for child in &doc.document.children {
            match child {
                DocumentChild::Paragraph(p) => {
                    text.push_str(&paragraph_text(p));
                    text.push('\n');
                }
                DocumentChild::Table(t) => table_text(t, &mut text),
                DocumentChild::StructuredDataTag(tag) => tag_text(tag, &mut text),
                _ => {}
            }
        }

        Ok(vec![Section::unlabeled(text)])
    }
}
