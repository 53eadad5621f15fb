//! Line-level layout recovery for text decoded from PDF pages.
//!
//! PDF text comes back as loose lines. This module regroups them into
//! headings, paragraphs and tables so the rest of the pipeline sees the same
//! shapes a Word document provides natively.

/// Minimum number of consecutive tabular lines that form a table.
const MIN_TABLE_ROWS: usize = 2;

/// Longest line still considered a heading candidate.
const MAX_HEADING_CHARS: usize = 90;

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    Table(Vec<Vec<String>>),
}

/// Split one page of text into blocks, in reading order.
///
/// A paragraph ends at a blank line, after a line that closes a sentence,
/// or where a heading or table starts. Lines inside a paragraph are kept
/// on separate lines so `Label: value` pairs stay line-anchored.
pub fn split_blocks(page_text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut table_lines: Vec<String> = Vec::new();

    for raw in page_text.lines() {
        let line = raw.trim_end();

        if is_tabular_line(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            table_lines.push(line.to_string());
            continue;
        }
        flush_table(&mut table_lines, &mut paragraph, &mut blocks);

        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }

        if is_heading_line(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading(trimmed.to_string()));
            continue;
        }

        paragraph.push(trimmed.to_string());
        if ends_sentence(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
        }
    }

    flush_table(&mut table_lines, &mut paragraph, &mut blocks);
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<String>, blocks: &mut Vec<Block>) {
    if !paragraph.is_empty() {
        blocks.push(Block::Paragraph(paragraph.join("\n")));
        paragraph.clear();
    }
}

fn flush_table(table_lines: &mut Vec<String>, paragraph: &mut Vec<String>, blocks: &mut Vec<Block>) {
    if table_lines.is_empty() {
        return;
    }
    if table_lines.len() >= MIN_TABLE_ROWS {
        let rows = table_lines
            .iter()
            .map(|l| split_cells(l))
            .filter(|cells| !is_separator_row(cells))
            .collect();
        blocks.push(Block::Table(rows));
    } else {
        // A lone aligned line reads as text.
        paragraph.extend(table_lines.iter().map(|l| l.trim().to_string()));
    }
    table_lines.clear();
}

/// Heuristic: a line looks tabular if it has columns separated by tabs,
/// pipes, or consistent multi-space gaps.
fn is_tabular_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.len() < 3 {
        return false;
    }

    if trimmed.contains('\t') {
        return true;
    }

    let pipes = trimmed.matches('|').count();
    if pipes >= 2 || (pipes == 1 && !trimmed.starts_with('|') && !trimmed.ends_with('|')) {
        return true;
    }

    count_multi_space_gaps(trimmed) >= 2
}

/// Count runs of 3+ consecutive spaces that separate non-empty text segments.
fn count_multi_space_gaps(text: &str) -> usize {
    let mut count = 0;
    let mut in_gap = false;
    let mut gap_len = 0;

    for ch in text.chars() {
        if ch == ' ' {
            gap_len += 1;
            if gap_len >= 3 && !in_gap {
                in_gap = true;
                count += 1;
            }
        } else {
            in_gap = false;
            gap_len = 0;
        }
    }

    count
}

pub fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let cells: Vec<String> = if trimmed.contains('\t') {
        trimmed.split('\t').map(|c| c.trim().to_string()).collect()
    } else if trimmed.contains('|') {
        let inner = trimmed.trim_start_matches('|').trim_end_matches('|');
        inner.split('|').map(|c| c.trim().to_string()).collect()
    } else {
        split_on_gaps(trimmed)
    };
    cells
}

fn split_on_gaps(text: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0;

    for ch in text.chars() {
        if ch == ' ' {
            spaces += 1;
            continue;
        }
        if spaces >= 3 && !current.is_empty() {
            cells.push(std::mem::take(&mut current));
        } else if spaces > 0 && !current.is_empty() {
            current.push_str(&" ".repeat(spaces));
        }
        spaces = 0;
        current.push(ch);
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

/// `|---|:--:|` style rows carry no data.
fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | '=' | ' ')))
}

fn ends_sentence(line: &str) -> bool {
    line.ends_with(['.', '!', '?'])
}

/// Numbered section titles ("4.2 Device description") and short
/// all-caps lines ("CLINICAL EVALUATION") are headings.
fn is_heading_line(line: &str) -> bool {
    if line.len() > MAX_HEADING_CHARS || ends_sentence(line) || line.ends_with(':') {
        return false;
    }
    if line.contains(": ") {
        return false;
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim_start();

    let numbered = !first.is_empty()
        && first.chars().next().is_some_and(|c| c.is_ascii_digit())
        && first.trim_end_matches('.').split('.').all(|p| {
            !p.is_empty() && p.len() <= 3 && p.chars().all(|c| c.is_ascii_digit())
        });
    if numbered {
        return rest.chars().next().is_some_and(|c| c.is_uppercase());
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 4 && letters.iter().all(|c| c.is_uppercase()) && line.split_whitespace().count() <= 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_lines_into_paragraphs() {
        let text = "The device is a sterile catheter\nused in adults.\nSecond paragraph here.";
        let blocks = split_blocks(text);
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("The device is a sterile catheter\nused in adults.".into()),
                Block::Paragraph("Second paragraph here.".into()),
            ]
        );
    }

    #[test]
    fn detects_numbered_and_caps_headings() {
        let blocks = split_blocks("1.2 Device Description\nCLINICAL DATA\nBody text.");
        assert_eq!(blocks[0], Block::Heading("1.2 Device Description".into()));
        assert_eq!(blocks[1], Block::Heading("CLINICAL DATA".into()));
        assert_eq!(blocks[2], Block::Paragraph("Body text.".into()));
    }

    #[test]
    fn label_lines_are_not_headings() {
        let blocks = split_blocks("Device Name: Acme Stent\nManufacturer: Acme");
        assert_eq!(
            blocks,
            vec![Block::Paragraph("Device Name: Acme Stent\nManufacturer: Acme".into())]
        );
    }

    #[test]
    fn pipe_rows_become_table() {
        let text = "Complaints follow.\n| ID | Date |\n|---|---|\n| C-1 | 2022-03-01 |\nEnd.";
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[1],
            Block::Table(vec![
                vec!["ID".into(), "Date".into()],
                vec!["C-1".into(), "2022-03-01".into()],
            ])
        );
    }

    #[test]
    fn single_aligned_line_stays_text() {
        let blocks = split_blocks("Name    Value    Unit\nAfter.");
        assert_eq!(blocks, vec![Block::Paragraph("Name    Value    Unit\nAfter.".into())]);
    }

    #[test]
    fn splits_multi_space_columns() {
        assert_eq!(
            split_cells("Potassium    4.2 mmol    normal"),
            vec!["Potassium", "4.2 mmol", "normal"]
        );
    }
}
