use std::collections::VecDeque;

use crate::loader::ExtractedText;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// Sequence index within the source document.
    pub position: usize,
    /// Page or sheet the chunk came from, when the format has one.
    pub section: Option<String>,
}

/// Split levels, coarsest first. A piece that still exceeds the chunk
/// size after splitting at one level is split again at the next.
#[derive(Debug, Clone, Copy)]
enum Separator {
    Literal(&'static str),
    Sentence,
    Char,
}

const SEPARATORS: &[Separator] = &[
    Separator::Literal("\n\n"),
    Separator::Literal("\n"),
    Separator::Sentence,
    Separator::Literal(" "),
    Separator::Char,
];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split after sentence terminators, keeping the terminator (and the
/// following whitespace) on the left piece.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut after_terminal = false;

    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        if after_terminal && c.is_whitespace() {
            pieces.push(&text[start..end]);
            start = end;
            after_terminal = false;
            continue;
        }
        if matches!(c, '。' | '！' | '？') {
            pieces.push(&text[start..end]);
            start = end;
            after_terminal = false;
            continue;
        }
        after_terminal = matches!(c, '.' | '!' | '?');
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

impl Separator {
    /// Split `text` so that concatenating the pieces gives `text` back.
    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Separator::Literal(sep) => text.split_inclusive(sep).collect(),
            Separator::Sentence => split_sentences(text),
            Separator::Char => text
                .char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect(),
        }
    }
}

/// Recursive character splitter with overlap.
///
/// Every chunk is at most `chunk_size` characters; consecutive chunks
/// produced from the same run of pieces share up to `chunk_overlap`
/// trailing characters of the previous chunk.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// `chunk_size` is clamped to at least 1 and `chunk_overlap` to below it.
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split every section of a document, numbering chunks in source order.
    #[must_use]
    pub fn chunk_document(&self, doc: &ExtractedText) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for section in &doc.sections {
            for content in self.split_text(&section.text) {
                chunks.push(Chunk {
                    content,
                    position: chunks.len(),
                    section: section.label.clone(),
                });
            }
        }
        chunks
    }

    /// Split text into non-empty, trimmed chunks.
    #[must_use]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        if text.trim().is_empty() {
            return out;
        }
        self.split_level(text, 0, &mut out);
        out
    }

    fn split_level(&self, text: &str, level: usize, out: &mut Vec<String>) {
        let separator = SEPARATORS[level.min(SEPARATORS.len() - 1)];
        let is_last = level + 1 >= SEPARATORS.len();
        let pieces = separator.split(text);

        // Separator absent: try the next finer one
        if pieces.len() <= 1 && !is_last {
            self.split_level(text, level + 1, out);
            return;
        }

        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                self.merge(&fitting, out);
                fitting.clear();
            }
            self.split_level(piece, level + 1, out);
        }

        if !fitting.is_empty() {
            self.merge(&fitting, out);
        }
    }

    /// Greedily pack pieces into chunks, carrying an overlap window forward.
    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                emit(&window, out);
                while total > 0 && (total > self.chunk_overlap || total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            emit(&window, out);
        }
    }
}

fn emit(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
