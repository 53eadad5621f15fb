use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::model::FieldValue;
use crate::schema::{FieldSpec, FieldType};

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d{1,3}(?:[, ]\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?").unwrap()
});
static RE_ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").unwrap());
static RE_DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})\b").unwrap());
static RE_DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})\b").unwrap()
});
static RE_MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b").unwrap()
});
static RE_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{4})\b").unwrap());
static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d{4})\s*$").unwrap());

/// Placeholder answers that mean "no value".
const ABSENT_MARKERS: &[&str] = &[
    "n/a",
    "na",
    "none",
    "null",
    "unknown",
    "not found",
    "not specified",
    "not stated",
    "not available",
    "-",
];

/// True for nulls, blanks, empty lists and placeholder strings.
pub fn is_absent(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => is_absent_str(s),
        Value::Array(items) => items.iter().all(is_absent),
        _ => false,
    }
}

pub fn is_absent_str(s: &str) -> bool {
    let t = s.trim().trim_end_matches('.').to_lowercase();
    t.is_empty() || ABSENT_MARKERS.contains(&t.as_str())
}

/// Coerce a JSON value from the understanding service into the field's type.
pub fn coerce(spec: &FieldSpec, raw: &Value) -> Result<FieldValue, String> {
    match (spec.field_type, raw) {
        (FieldType::Number, Value::Number(n)) => n
            .as_f64()
            .map(FieldValue::Number)
            .ok_or_else(|| "number out of range".to_string()),
        (FieldType::TextList, Value::Array(items)) => {
            let list: Vec<String> = items
                .iter()
                .filter(|v| !is_absent(v))
                .map(scalar_text)
                .collect::<Result<_, _>>()?;
            let list: Vec<String> = list.iter().map(|s| clean_text(s)).filter(|s| !s.is_empty()).collect();
            Ok(FieldValue::TextList(list))
        }
        (FieldType::Text, Value::Array(items)) => {
            let parts: Vec<String> = items.iter().map(scalar_text).collect::<Result<_, _>>()?;
            coerce_str(spec, &parts.join(", "))
        }
        (_, Value::String(s)) => coerce_str(spec, s),
        (_, Value::Number(n)) => coerce_str(spec, &n.to_string()),
        (_, other) => Err(format!("unexpected JSON {}", json_kind(other))),
    }
}

/// Coerce raw text (a label value, cue capture or table cell).
pub fn coerce_str(spec: &FieldSpec, raw: &str) -> Result<FieldValue, String> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return Err("blank text".to_string());
    }

    match spec.field_type {
        FieldType::Text => Ok(FieldValue::Text(cleaned)),
        FieldType::TextList => Ok(FieldValue::TextList(split_list(&cleaned))),
        FieldType::Number => parse_number(&cleaned)
            .map(FieldValue::Number)
            .ok_or_else(|| format!("no number in '{cleaned}'")),
        FieldType::Date => parse_date(&cleaned)
            .map(FieldValue::Date)
            .ok_or_else(|| format!("unrecognised date '{cleaned}'")),
        FieldType::Enum => match_enum(spec, &cleaned)
            .map(FieldValue::Enum)
            .ok_or_else(|| format!("'{cleaned}' is not in the vocabulary")),
        FieldType::Reference => {
            let reference = cleaned.trim_end_matches(['.', ',', ';']).to_string();
            Ok(FieldValue::Reference(reference))
        }
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("unexpected JSON {} in list", json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Collapse whitespace and strip wrapping quotes and trailing separators.
pub fn clean_text(raw: &str) -> String {
    let collapsed = RE_WHITESPACE.replace_all(raw.trim(), " ");
    collapsed
        .trim()
        .trim_end_matches([';', ','])
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”'))
        .trim()
        .to_string()
}

/// Split on list separators and bullets.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ';', ',', '•'])
        .map(clean_text)
        .map(|s| s.trim_start_matches(['-', '*']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// First number in the text. Thousands separators (`12,500`, `12 500`) are
/// accepted.
pub fn parse_number(raw: &str) -> Option<f64> {
    let m = RE_NUMBER.find(raw)?;
    let digits: String = m.as_str().chars().filter(|c| *c != ',' && *c != ' ').collect();
    digits.parse::<f64>().ok()
}

/// Dates in ISO, day-first numeric, and month-name forms. A bare year maps
/// to 1 January and a month-year to the first of the month.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Some(c) = RE_ISO_DATE.captures(raw) {
        return ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = RE_DMY_DATE.captures(raw) {
        return ymd(&c[3], &c[2], &c[1]);
    }
    if let Some(c) = RE_DAY_MONTH_YEAR.captures(raw) {
        if let Some(month) = month_number(&c[2]) {
            return NaiveDate::from_ymd_opt(c[3].parse().ok()?, month, c[1].parse().ok()?);
        }
    }
    if let Some(c) = RE_MONTH_DAY_YEAR.captures(raw) {
        if let Some(month) = month_number(&c[1]) {
            return NaiveDate::from_ymd_opt(c[3].parse().ok()?, month, c[2].parse().ok()?);
        }
    }
    if let Some(c) = RE_MONTH_YEAR.captures(raw) {
        if let Some(month) = month_number(&c[1]) {
            return NaiveDate::from_ymd_opt(c[2].parse().ok()?, month, 1);
        }
    }
    if let Some(c) = RE_YEAR.captures(raw) {
        return NaiveDate::from_ymd_opt(c[1].parse().ok()?, 1, 1);
    }
    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = name.to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(lower.as_str()))
        .map(|i| i as u32 + 1)
}

/// Map free text onto the closed vocabulary.
///
/// Tries, in order: the whole text against values and synonyms, multi-word
/// synonyms as phrases inside the text, then single tokens. Comparison is
/// case-insensitive.
pub fn match_enum(spec: &FieldSpec, raw: &str) -> Option<String> {
    let text = normalize_phrase(raw);
    if text.is_empty() {
        return None;
    }

    for term in &spec.vocabulary {
        if normalize_phrase(&term.value) == text
            || term.synonyms.iter().any(|s| normalize_phrase(s) == text)
        {
            return Some(term.value.clone());
        }
    }

    let padded = format!(" {text} ");
    for term in &spec.vocabulary {
        let phrase_hit = term
            .synonyms
            .iter()
            .map(|s| normalize_phrase(s))
            .filter(|s| s.contains(' '))
            .any(|s| padded.contains(&format!(" {s} ")));
        if phrase_hit {
            return Some(term.value.clone());
        }
    }

    for token in text.split(' ') {
        for term in &spec.vocabulary {
            let value = normalize_phrase(&term.value);
            if value == token || term.synonyms.iter().any(|s| normalize_phrase(s) == token) {
                return Some(term.value.clone());
            }
        }
    }
    None
}

fn normalize_phrase(raw: &str) -> String {
    raw.to_lowercase()
        .replace('_', " ")
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
