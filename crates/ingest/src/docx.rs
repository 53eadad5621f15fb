use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::ZipArchive;

use crate::document::{DocumentBuilder, DocumentFormat, RawDocument, SegmentKind};
use crate::error::LoadError;

const DOCUMENT_PART: &str = "word/document.xml";

/// Stream `word/document.xml` out of the archive as XML events. The part is
/// never inflated into memory as a whole.
pub(crate) fn read_docx(path: &Path) -> Result<RawDocument, LoadError> {
    let content_hash = crate::content_hash_blocking(path)?;

    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| LoadError::corrupt(path, format!("not a Word archive: {e}")))?;
    let part = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| LoadError::corrupt(path, format!("missing {DOCUMENT_PART}: {e}")))?;

    let mut reader = Reader::from_reader(BufReader::new(part));
    let mut walker = BodyWalker::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => walker.open(&e),
            Ok(Event::Empty(e)) => {
                walker.open(&e);
                walker.close(e.name().as_ref());
            }
            Ok(Event::End(e)) => walker.close(e.name().as_ref()),
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| LoadError::corrupt(path, format!("bad text encoding: {e}")))?;
                walker.text(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LoadError::corrupt(path, format!("malformed document XML: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    if walker.table_depth != 0 || walker.paragraph.is_some() {
        return Err(LoadError::corrupt(path, "document XML ended inside an open element"));
    }

    let page_count = walker.page;
    walker
        .builder
        .finish(path, content_hash, DocumentFormat::Docx, page_count)
}

#[derive(Default)]
struct TableState {
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
}

/// Tracks where we are in the WordprocessingML body tree.
///
/// Page numbers follow explicit page breaks only; Word does not store
/// rendered pagination.
struct BodyWalker {
    builder: DocumentBuilder,
    page: u32,
    paragraph: Option<String>,
    style: Option<String>,
    in_run: bool,
    in_text: bool,
    table_depth: usize,
    table: TableState,
}

impl BodyWalker {
    fn new() -> Self {
        Self {
            builder: DocumentBuilder::new(),
            page: 1,
            paragraph: None,
            style: None,
            in_run: false,
            in_text: false,
            table_depth: 0,
            table: TableState::default(),
        }
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        match e.name().as_ref() {
            b"w:p" => {
                self.paragraph = Some(String::new());
                self.style = None;
            }
            b"w:pStyle" => {
                if self.paragraph.is_some() {
                    self.style = attribute(e, "w:val");
                }
            }
            b"w:r" => self.in_run = true,
            b"w:t" => self.in_text = true,
            b"w:tab" if self.in_run => self.push_char('\t'),
            b"w:br" => {
                if attribute(e, "w:type").as_deref() == Some("page") {
                    self.page += 1;
                } else if self.in_run {
                    self.push_char('\n');
                }
            }
            b"w:tbl" => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.table = TableState::default();
                }
            }
            b"w:tr" if self.table_depth == 1 => self.table.row = Some(Vec::new()),
            b"w:tc" if self.table_depth == 1 => self.table.cell = Some(String::new()),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"w:t" => self.in_text = false,
            b"w:r" => self.in_run = false,
            b"w:p" => {
                let text = self.paragraph.take().unwrap_or_default();
                if self.table_depth > 0 {
                    if let Some(cell) = self.table.cell.as_mut() {
                        let text = text.trim();
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push('\n');
                            }
                            cell.push_str(text);
                        }
                    }
                } else {
                    let kind = if is_heading_style(self.style.as_deref()) {
                        SegmentKind::Heading
                    } else {
                        SegmentKind::Body
                    };
                    self.builder.push_paragraph(self.page, kind, &text);
                }
                self.style = None;
            }
            b"w:tc" if self.table_depth == 1 => {
                if let (Some(cell), Some(row)) = (self.table.cell.take(), self.table.row.as_mut()) {
                    row.push(cell);
                }
            }
            b"w:tr" if self.table_depth == 1 => {
                if let Some(row) = self.table.row.take() {
                    self.table.rows.push(row);
                }
            }
            b"w:tbl" => {
                if self.table_depth == 1 {
                    let rows = std::mem::take(&mut self.table.rows);
                    self.builder.push_table(self.page, rows);
                }
                self.table_depth = self.table_depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_text {
            if let Some(p) = self.paragraph.as_mut() {
                p.push_str(text);
            }
        }
    }

    fn push_char(&mut self, ch: char) {
        if let Some(p) = self.paragraph.as_mut() {
            p.push(ch);
        }
    }
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn is_heading_style(style: Option<&str>) -> bool {
    match style {
        Some(s) => {
            let s = s.to_ascii_lowercase();
            s.starts_with("heading") || s == "title"
        }
        None => false,
    }
}
