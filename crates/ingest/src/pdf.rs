use lopdf::Document;
use std::path::Path;
use tracing::debug;

use crate::document::{DocumentBuilder, DocumentFormat, RawDocument, SegmentKind};
use crate::error::LoadError;
use crate::layout::{self, Block};

/// Decode a PDF page by page. The object graph is loaded straight from the
/// file; only one page's text is held at a time, split into blocks and
/// dropped before the next page is decoded.
pub(crate) fn read_pdf(path: &Path) -> Result<RawDocument, LoadError> {
    let content_hash = crate::content_hash_blocking(path)?;

    let document = Document::load(path).map_err(|e| match e {
        lopdf::Error::IO(source) => LoadError::io(path, source),
        other => LoadError::corrupt(path, format!("invalid PDF structure: {other}")),
    })?;

    let pages = document.get_pages();
    if pages.is_empty() {
        return Err(LoadError::corrupt(path, "PDF has no pages"));
    }
    let total = pages.len();

    let mut builder = DocumentBuilder::new();
    for (position, page_number) in pages.keys().copied().enumerate() {
        let text = document
            .extract_text(&[page_number])
            .map_err(|e| LoadError::corrupt(path, format!("page {page_number}: {e}")))?;

        for block in layout::split_blocks(&text) {
            match block {
                Block::Heading(t) => builder.push_paragraph(page_number, SegmentKind::Heading, &t),
                Block::Paragraph(t) => builder.push_paragraph(page_number, SegmentKind::Body, &t),
                Block::Table(rows) => builder.push_table(page_number, rows),
            }
        }

        if (position + 1) % 100 == 0 {
            debug!(pages_done = position + 1, pages_total = total, "Decoding PDF");
        }
    }

    builder.finish(path, content_hash, DocumentFormat::Pdf, total as u32)
}
