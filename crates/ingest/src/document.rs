use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Heading,
    Body,
}

/// One paragraph (or heading) of narrative text, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    /// Position in `RawDocument::segments`.
    pub index: usize,
    /// 1-based page the paragraph starts on.
    pub page: u32,
    /// Ordinal of the paragraph within its page.
    pub paragraph: usize,
    pub kind: SegmentKind,
    pub text: String,
}

/// Tabular content kept apart from the narrative flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub index: usize,
    pub page: u32,
    /// Number of text segments that precede the table.
    pub anchor: usize,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(|r| r.as_slice())
    }

    pub fn body_rows(&self) -> &[Vec<String>] {
        if self.rows.is_empty() {
            &[]
        } else {
            &self.rows[1..]
        }
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Pipe-separated rendering, one row per line.
    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decoded source document. Never mutated after `FileReader::load` returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub source: PathBuf,
    pub content_hash: String,
    pub format: DocumentFormat,
    pub page_count: u32,
    pub segments: Vec<TextSegment>,
    pub tables: Vec<Table>,
}

impl RawDocument {
    pub fn heading_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Heading)
            .count()
    }

    pub fn text_len(&self) -> usize {
        self.segments.iter().map(|s| s.text.len()).sum()
    }
}

/// Accumulates segments and tables while a decoder walks the source.
pub(crate) struct DocumentBuilder {
    segments: Vec<TextSegment>,
    tables: Vec<Table>,
    current_page: u32,
    paragraph_on_page: usize,
}

impl DocumentBuilder {
    pub(crate) fn new() -> Self {
        Self {
            segments: Vec::new(),
            tables: Vec::new(),
            current_page: 0,
            paragraph_on_page: 0,
        }
    }

    fn enter_page(&mut self, page: u32) {
        if page != self.current_page {
            self.current_page = page;
            self.paragraph_on_page = 0;
        }
    }

    pub(crate) fn push_paragraph(&mut self, page: u32, kind: SegmentKind, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.enter_page(page);
        self.segments.push(TextSegment {
            index: self.segments.len(),
            page,
            paragraph: self.paragraph_on_page,
            kind,
            text: text.to_string(),
        });
        self.paragraph_on_page += 1;
    }

    pub(crate) fn push_table(&mut self, page: u32, rows: Vec<Vec<String>>) {
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.enter_page(page);
        self.tables.push(Table {
            index: self.tables.len(),
            page,
            anchor: self.segments.len(),
            rows,
        });
    }

    pub(crate) fn finish(
        self,
        source: &Path,
        content_hash: String,
        format: DocumentFormat,
        page_count: u32,
    ) -> Result<RawDocument, LoadError> {
        if self.segments.is_empty() && self.tables.is_empty() {
            return Err(LoadError::corrupt(source, "no extractable text or tables"));
        }

        Ok(RawDocument {
            source: source.to_path_buf(),
            content_hash,
            format,
            page_count,
            segments: self.segments,
            tables: self.tables,
        })
    }
}
