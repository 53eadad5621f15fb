use std::collections::BTreeSet;

use crate::model::StructuredEntityBundle;
use crate::schema::{EntityKindSpec, EntitySchema};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "what", "which", "are", "this", "that", "from", "about", "any", "all", "was",
    "were", "has", "have", "into", "their", "its",
];

impl StructuredEntityBundle {
    /// Plain-text rendering of one entity kind, for downstream text
    /// generators. Empty when the bundle holds no instance of the kind.
    pub fn render_context(&self, schema: &EntitySchema, kind: &str) -> String {
        let Some(spec) = schema.kind(kind) else {
            return String::new();
        };
        let instances = self.instances(kind);
        if instances.is_empty() {
            return String::new();
        }

        let mut out = format!("=== {} ===\n", section_title(&spec.name));
        for (n, instance) in instances.iter().enumerate() {
            if instances.len() > 1 {
                out.push_str(&format!("[{}]\n", n + 1));
            }
            // Schema order, not map order
            for field in &spec.fields {
                if let Some(value) = instance.get(&field.name) {
                    out.push_str(&format!("{}: {}\n", field.name, value.display()));
                }
            }
        }
        out
    }

    /// Context for a free-text request: the kinds whose names, fields or
    /// descriptions share words with the query, best match first, cut at
    /// `max_chars`. Falls back to every populated kind when nothing matches.
    pub fn relevant_context(&self, schema: &EntitySchema, query: &str, max_chars: usize) -> String {
        let words = keywords(query);

        let mut scored: Vec<(usize, usize, &EntityKindSpec)> = schema
            .kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| !self.instances(&kind.name).is_empty())
            .map(|(order, kind)| {
                let vocabulary = kind_keywords(kind);
                let score = words.iter().filter(|w| vocabulary.contains(*w)).count();
                (score, order, kind)
            })
            .collect();

        if scored.iter().any(|(score, _, _)| *score > 0) {
            scored.retain(|(score, _, _)| *score > 0);
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut out = String::new();
        for (_, _, kind) in scored {
            let section = self.render_context(schema, &kind.name);
            let separator = usize::from(!out.is_empty());
            if out.chars().count() + separator + section.chars().count() > max_chars {
                if out.is_empty() {
                    out = section.chars().take(max_chars).collect();
                }
                break;
            }
            if separator == 1 {
                out.push('\n');
            }
            out.push_str(&section);
        }
        out
    }
}

/// `ClinicalEvidenceItem` -> `CLINICAL EVIDENCE ITEM`
fn section_title(name: &str) -> String {
    split_camel(name).join(" ").to_uppercase()
}

fn split_camel(name: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for c in name.chars() {
        match words.last_mut() {
            Some(word) if !c.is_uppercase() => word.push(c),
            _ => words.push(c.to_string()),
        }
    }
    words
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn kind_keywords(kind: &EntityKindSpec) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for word in split_camel(&kind.name) {
        out.extend(keywords(&word));
    }
    out.extend(keywords(&kind.description));
    for field in &kind.fields {
        out.extend(keywords(&field.name.replace('_', " ")));
        out.extend(keywords(&field.description));
    }
    out
}

/// Crude plural folding so "complaints" meets "complaint".
fn stem(word: &str) -> String {
    match word.strip_suffix('s') {
        Some(rest) if rest.len() >= 3 && !rest.ends_with('s') => rest.to_string(),
        _ => word.to_string(),
    }
}
