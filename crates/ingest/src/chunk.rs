use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::{Table, TextSegment};

/// A bounded-size extraction unit: consecutive text segments plus the
/// tables anchored among them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub chunk_id: String,
    pub segments: Vec<TextSegment>,
    pub tables: Vec<Table>,
}

impl Chunk {
    pub fn new(index: usize, segments: Vec<TextSegment>, tables: Vec<Table>) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(&segments, &tables);

        Self {
            index,
            chunk_id,
            segments,
            tables,
        }
    }

    fn generate_chunk_id(segments: &[TextSegment], tables: &[Table]) -> String {
        let mut hasher = Sha256::new();
        for segment in segments {
            hasher.update(segment.index.to_le_bytes());
            hasher.update(segment.text.as_bytes());
        }
        for table in tables {
            hasher.update(table.index.to_le_bytes());
            for row in &table.rows {
                for cell in row {
                    hasher.update(cell.as_bytes());
                    hasher.update([0x1f]);
                }
                hasher.update([0x1e]);
            }
        }
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// Narrative text, paragraphs separated by blank lines.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        let text_tokens: usize = self.segments.iter().map(|s| estimate_tokens(&s.text)).sum();
        let table_tokens: usize = self.tables.iter().map(table_tokens).sum();
        text_tokens + table_tokens
    }

    /// First and last source segment index covered by this chunk.
    pub fn segment_range(&self) -> Option<(usize, usize)> {
        let first = self.segments.first()?.index;
        let last = self.segments.last()?.index;
        Some((first, last))
    }

    /// First and last page touched by this chunk's segments or tables.
    pub fn page_range(&self) -> Option<(u32, u32)> {
        let pages = self
            .segments
            .iter()
            .map(|s| s.page)
            .chain(self.tables.iter().map(|t| t.page));
        let mut range: Option<(u32, u32)> = None;
        for page in pages {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(page), hi.max(page)),
                None => (page, page),
            });
        }
        range
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.tables.is_empty()
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 * 1.3).ceil() as usize
}

pub fn table_tokens(table: &Table) -> usize {
    table.rows.iter().map(|row| row_tokens(row)).sum()
}

pub fn row_tokens(row: &[String]) -> usize {
    // Cell separators cost roughly a token each.
    row.iter().map(|c| estimate_tokens(c)).sum::<usize>() + row.len()
}
