use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::{Chunk, estimate_tokens, row_tokens, table_tokens};
use crate::document::{RawDocument, SegmentKind, Table, TextSegment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Upper bound on the estimated size of one chunk.
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_tokens: 900 }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

#[derive(Default)]
struct Unit {
    segments: Vec<TextSegment>,
    tables: Vec<Table>,
    tokens: usize,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: ChunkerConfig {
                max_tokens: config.max_tokens.max(16),
            },
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    pub fn chunk_document(&self, doc: &RawDocument) -> Vec<Chunk> {
        self.chunk_parts(&doc.segments, &doc.tables)
    }

    /// Split segments into bounded chunks without breaking paragraphs.
    ///
    /// Sections (runs starting at a heading) are kept whole when they fit.
    /// A paragraph is only cut, at sentence boundaries, when it alone
    /// exceeds the bound. Tables ride along with the chunk holding the
    /// segment just before them; tables too large for that chunk get chunks
    /// of their own, split by rows with the header repeated.
    pub fn chunk_parts(&self, segments: &[TextSegment], tables: &[Table]) -> Vec<Chunk> {
        let max = self.config.max_tokens;
        let mut units: Vec<Unit> = Vec::new();
        let mut buffer = Unit::default();

        for section in self.split_by_headings(segments) {
            let section_tokens: usize = section.iter().map(|s| estimate_tokens(&s.text)).sum();

            if !buffer.segments.is_empty() && buffer.tokens + section_tokens > max {
                units.push(std::mem::take(&mut buffer));
            }

            if section_tokens <= max {
                buffer.segments.extend(section.iter().cloned());
                buffer.tokens += section_tokens;
                continue;
            }

            // Otherwise, pack by paragraph
            for segment in section {
                for piece in self.split_oversized(segment) {
                    let piece_tokens = estimate_tokens(&piece.text);
                    if buffer.tokens + piece_tokens > max && !buffer.segments.is_empty() {
                        units.push(std::mem::take(&mut buffer));
                    }
                    buffer.tokens += piece_tokens;
                    buffer.segments.push(piece);
                }
            }
        }

        if !buffer.segments.is_empty() {
            units.push(buffer);
        }

        let trailing = self.attach_tables(&mut units, tables);

        let mut chunks = Vec::new();
        for (unit, extra) in units.into_iter().zip(trailing) {
            for u in std::iter::once(unit).chain(extra) {
                if u.segments.is_empty() && u.tables.is_empty() {
                    continue;
                }
                chunks.push(Chunk::new(chunks.len(), u.segments, u.tables));
            }
        }
        chunks
    }

    /// Returns, per unit, the table-only units that must follow it.
    fn attach_tables(&self, units: &mut Vec<Unit>, tables: &[Table]) -> Vec<Vec<Unit>> {
        let max = self.config.max_tokens;
        if units.is_empty() && !tables.is_empty() {
            units.push(Unit::default());
        }
        let mut trailing: Vec<Vec<Unit>> = units.iter().map(|_| Vec::new()).collect();

        for table in tables {
            let position = locate_unit(units, table.anchor);
            let tokens = table_tokens(table);
            let unit = &mut units[position];

            if unit.tokens + tokens <= max {
                unit.tokens += tokens;
                unit.tables.push(table.clone());
                continue;
            }

            for part in self.split_table(table) {
                let part_tokens = table_tokens(&part);
                let slot = &mut trailing[position];
                match slot.last_mut() {
                    Some(last) if last.tokens + part_tokens <= max => {
                        last.tokens += part_tokens;
                        last.tables.push(part);
                    }
                    _ => slot.push(Unit {
                        segments: Vec::new(),
                        tables: vec![part],
                        tokens: part_tokens,
                    }),
                }
            }
        }

        trailing
    }

    fn split_table(&self, table: &Table) -> Vec<Table> {
        let max = self.config.max_tokens;
        let Some(header) = table.rows.first() else {
            return Vec::new();
        };
        let header_tokens = row_tokens(header);
        let mut parts = Vec::new();
        let mut rows: Vec<Vec<String>> = vec![header.clone()];
        let mut tokens = header_tokens;

        for row in table.body_rows() {
            let t = row_tokens(row);
            if tokens + t > max && rows.len() > 1 {
                parts.push(Table {
                    rows: std::mem::replace(&mut rows, vec![header.clone()]),
                    ..table.clone()
                });
                tokens = header_tokens;
            }
            rows.push(row.clone());
            tokens += t;
        }
        if rows.len() > 1 || parts.is_empty() {
            parts.push(Table {
                rows,
                ..table.clone()
            });
        }
        parts
    }

    fn split_by_headings<'a>(&self, segments: &'a [TextSegment]) -> Vec<&'a [TextSegment]> {
        let mut sections = Vec::new();
        let mut start = 0;

        for (i, segment) in segments.iter().enumerate() {
            if segment.kind == SegmentKind::Heading && i > start {
                sections.push(&segments[start..i]);
                start = i;
            }
        }
        if start < segments.len() {
            sections.push(&segments[start..]);
        }

        sections
    }

    /// Cut a paragraph that alone exceeds the bound at sentence boundaries,
    /// falling back to word boundaries for run-on text.
    fn split_oversized(&self, segment: &TextSegment) -> Vec<TextSegment> {
        let max = self.config.max_tokens;
        if estimate_tokens(&segment.text) <= max {
            return vec![segment.clone()];
        }

        let mut pieces = Vec::new();
        let mut current = String::new();

        for sentence in segment.text.split_sentence_bounds() {
            if estimate_tokens(sentence) > max {
                for word_piece in split_words(sentence, max) {
                    push_piece(&mut pieces, &mut current, &word_piece, max);
                }
            } else {
                push_piece(&mut pieces, &mut current, sentence, max);
            }
        }
        if !current.trim().is_empty() {
            pieces.push(current);
        }

        pieces
            .into_iter()
            .map(|text| TextSegment {
                text: text.trim().to_string(),
                ..segment.clone()
            })
            .collect()
    }
}

fn push_piece(pieces: &mut Vec<String>, current: &mut String, next: &str, max: usize) {
    if estimate_tokens(current) + estimate_tokens(next) > max && !current.trim().is_empty() {
        pieces.push(std::mem::take(current));
    }
    current.push_str(next);
}

fn split_words(text: &str, max_tokens: usize) -> Vec<String> {
    let words_per_piece = ((max_tokens as f64 / 1.3) as usize).max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(words_per_piece)
        .map(|w| format!("{} ", w.join(" ")))
        .collect()
}

/// Index of the unit holding the segment just before `anchor`.
fn locate_unit(units: &[Unit], anchor: usize) -> usize {
    if anchor == 0 {
        return 0;
    }
    let target = anchor - 1;
    units
        .iter()
        .position(|u| u.segments.iter().any(|s| s.index == target))
        .or_else(|| {
            units
                .iter()
                .rposition(|u| u.segments.first().is_some_and(|s| s.index <= target))
        })
        .unwrap_or(0)
}
