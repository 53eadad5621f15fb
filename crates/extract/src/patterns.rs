//! Compiled label and cue patterns for one schema.
//!
//! Field-name variants live in the schema as ordered pattern lists. This
//! module only compiles and evaluates them; adding a naming variant never
//! needs new code here.

use regex::Regex;

use crate::error::{ExtractError, ExtractResult};
use crate::schema::EntitySchema;

/// Index of a field inside a schema: `schema.kinds[kind].fields[field]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    pub kind: usize,
    pub field: usize,
}

struct FieldPatterns {
    at: FieldRef,
    labels: Vec<Regex>,
    cues: Vec<Regex>,
}

pub struct PatternSet {
    fields: Vec<FieldPatterns>,
}

/// How header cells of a table map onto one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub kind: usize,
    /// `(column index, field)` for every recognised column.
    pub columns: Vec<(usize, FieldRef)>,
}

impl PatternSet {
    pub fn compile(schema: &EntitySchema) -> ExtractResult<Self> {
        let mut fields = Vec::new();

        for (k, kind) in schema.kinds.iter().enumerate() {
            for (f, field) in kind.fields.iter().enumerate() {
                let compile = |pattern: String| {
                    Regex::new(&pattern).map_err(|source| ExtractError::Pattern {
                        kind: kind.name.clone(),
                        field: field.name.clone(),
                        source,
                    })
                };

                let labels = field
                    .labels
                    .iter()
                    .map(|l| compile(format!(r"(?i)^\s*(?:{l})\s*$")))
                    .collect::<ExtractResult<Vec<_>>>()?;
                let cues = field
                    .cues
                    .iter()
                    .map(|c| compile(c.clone()))
                    .collect::<ExtractResult<Vec<_>>>()?;

                fields.push(FieldPatterns {
                    at: FieldRef { kind: k, field: f },
                    labels,
                    cues,
                });
            }
        }

        Ok(Self { fields })
    }

    /// First field, in schema order, with a label pattern matching `label`.
    pub fn match_label(&self, label: &str) -> Option<FieldRef> {
        let label = strip_label(label);
        self.fields
            .iter()
            .find(|f| f.labels.iter().any(|re| re.is_match(label)))
            .map(|f| f.at)
    }

    /// Like `match_label`, restricted to one kind. Returns the matched field
    /// and the rank of the pattern that matched (0 = highest priority).
    pub fn match_label_in_kind(&self, kind: usize, label: &str) -> Option<(FieldRef, usize)> {
        let label = strip_label(label);
        self.fields
            .iter()
            .filter(|f| f.at.kind == kind)
            .filter_map(|f| {
                f.labels
                    .iter()
                    .position(|re| re.is_match(label))
                    .map(|rank| (f.at, rank))
            })
            .min_by_key(|(at, rank)| (*rank, at.field))
    }

    /// All cue patterns, in schema order.
    pub fn cues(&self) -> impl Iterator<Item = (FieldRef, &Regex)> {
        self.fields
            .iter()
            .flat_map(|f| f.cues.iter().map(move |re| (f.at, re)))
    }

    /// Pick the kind whose fields explain most header cells. At least two
    /// recognised columns are needed. Ties go to the earlier kind.
    pub fn match_header(&self, header: &[String], kinds: usize) -> Option<ColumnMap> {
        let mut best: Option<ColumnMap> = None;

        for kind in 0..kinds {
            let mut columns: Vec<(usize, FieldRef, usize)> = Vec::new();
            for (col, cell) in header.iter().enumerate() {
                if let Some((at, rank)) = self.match_label_in_kind(kind, cell) {
                    columns.push((col, at, rank));
                }
            }
            // One column per field: keep the best-ranked, then leftmost.
            columns.sort_by_key(|(col, at, rank)| (at.field, *rank, *col));
            columns.dedup_by_key(|(_, at, _)| at.field);
            columns.sort_by_key(|(col, _, _)| *col);

            if columns.len() < 2 {
                continue;
            }
            let better = best.as_ref().is_none_or(|b| columns.len() > b.columns.len());
            if better {
                best = Some(ColumnMap {
                    kind,
                    columns: columns.into_iter().map(|(c, at, _)| (c, at)).collect(),
                });
            }
        }

        best
    }
}

fn strip_label(label: &str) -> &str {
    label
        .trim()
        .trim_start_matches(['-', '*', '•'])
        .trim_end_matches([':', '='])
        .trim()
}

/// Split `Label: value` lines. Labels are short, do not end in a digit
/// (times like `10:30`) and do not span a sentence break.
pub fn split_label_line(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':')?;
    let label = label.trim();
    if label.is_empty() || label.len() > 60 || label.contains(['?', '!']) || label.contains(". ") {
        return None;
    }
    if label.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((label, value.trim()))
}
