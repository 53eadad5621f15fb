use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{Cardinality, EntityKindSpec, EntitySchema};
use crate::validation::check_value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Number(f64),
    Date(NaiveDate),
    Enum(String),
    Reference(String),
}

impl FieldValue {
    /// Plain rendering for context strings and identity keys.
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) | Self::Enum(s) | Self::Reference(s) => s.clone(),
            Self::TextList(items) => items.join(", "),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Ai,
    Heuristic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Heuristic => "heuristic",
        }
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: Strategy,
    pub chunk: usize,
    /// First and last source segment of the chunk, when it has text.
    pub segments: Option<(usize, usize)>,
    pub pages: Option<(u32, u32)>,
    /// Source table, when the value was read from one.
    pub table: Option<usize>,
}

impl Provenance {
    pub fn for_chunk(strategy: Strategy, chunk: &ingest::Chunk) -> Self {
        Self {
            strategy,
            chunk: chunk.index,
            segments: chunk.segment_range(),
            pages: chunk.page_range(),
            table: None,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: &ingest::Table) -> Self {
        self.table = Some(table.index);
        self.pages = Some((table.page, table.page));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulatedField {
    pub value: FieldValue,
    pub provenance: Provenance,
}

/// A candidate value that failed coercion or validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedField {
    pub field: String,
    pub reason: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    pub fields: BTreeMap<String, PopulatedField>,
    pub rejected: Vec<RejectedField>,
}

impl EntityInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).map(|f| &f.value)
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// First writer wins. Returns whether the value was stored.
    pub fn set_if_empty(&mut self, field: &str, populated: PopulatedField) -> bool {
        if self.fields.contains_key(field) {
            return false;
        }
        self.fields.insert(field.to_string(), populated);
        true
    }

    pub fn reject(&mut self, rejected: RejectedField) {
        self.rejected.push(rejected);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Case- and space-insensitive identity value for `Many` kinds.
    pub fn identity_key(&self, spec: &EntityKindSpec) -> Option<String> {
        let field = spec.identity.as_deref()?;
        let value = self.get(field)?.display();
        let key = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (!key.is_empty()).then_some(key)
    }

    fn absorb(&mut self, other: EntityInstance) {
        for (name, populated) in other.fields {
            self.fields.entry(name).or_insert(populated);
        }
        self.rejected.extend(other.rejected);
    }
}

/// Entities found in one chunk (or the running merge of several).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialEntityBundle {
    pub entities: BTreeMap<String, Vec<EntityInstance>>,
}

impl PartialEntityBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(|v| v.iter().all(|i| i.is_empty()))
    }

    pub fn populated_field_count(&self) -> usize {
        self.entities
            .values()
            .flat_map(|v| v.iter())
            .map(|i| i.fields.len())
            .sum()
    }

    /// Add one instance, merging it into an existing one when the kind
    /// allows a single instance or the identity matches.
    pub fn add(&mut self, spec: &EntityKindSpec, instance: EntityInstance) {
        if instance.is_empty() && instance.rejected.is_empty() {
            return;
        }
        let list = self.entities.entry(spec.name.clone()).or_default();

        match spec.cardinality {
            Cardinality::Single => match list.first_mut() {
                Some(existing) => existing.absorb(instance),
                None => list.push(instance),
            },
            Cardinality::Many => {
                let key = instance.identity_key(spec);
                let existing = key.as_ref().and_then(|key| {
                    list.iter_mut()
                        .find(|i| i.identity_key(spec).as_ref() == Some(key))
                });
                match existing {
                    Some(existing) => existing.absorb(instance),
                    None => list.push(instance),
                }
            }
        }
    }

    /// Merge a later chunk's bundle into this one. Values already present
    /// are never overwritten, so the result depends only on chunk order.
    pub fn merge(&mut self, other: PartialEntityBundle, schema: &EntitySchema) {
        for (kind, instances) in other.entities {
            match schema.kind(&kind) {
                Some(spec) => {
                    for instance in instances {
                        self.add(spec, instance);
                    }
                }
                None => {
                    self.entities.entry(kind).or_default().extend(instances);
                }
            }
        }
    }

    /// Drop rejections that a populated value superseded, and duplicates.
    pub fn finalize(&mut self) {
        for instances in self.entities.values_mut() {
            for instance in instances.iter_mut() {
                let fields = &instance.fields;
                let mut seen = std::collections::BTreeSet::new();
                instance.rejected.retain(|r| {
                    !fields.contains_key(&r.field) && seen.insert((r.field.clone(), r.reason.clone()))
                });
            }
            instances.retain(|i| !i.is_empty());
        }
        self.entities.retain(|_, v| !v.is_empty());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub chunks: usize,
    /// Chunks answered by the understanding service.
    pub ai_chunks: usize,
    /// Chunks that fell back to local heuristics.
    pub fallback_chunks: usize,
    pub rejected_fields: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredEntityBundle {
    pub schema_version: u32,
    pub entities: BTreeMap<String, Vec<EntityInstance>>,
    pub completeness: f64,
    pub stats: ExtractionStats,
}

impl StructuredEntityBundle {
    pub fn from_partial(partial: PartialEntityBundle, schema: &EntitySchema, stats: ExtractionStats) -> Self {
        let mut partial = partial;
        partial.finalize();
        let stats = ExtractionStats {
            rejected_fields: partial
                .entities
                .values()
                .flat_map(|v| v.iter())
                .map(|i| i.rejected.len())
                .sum(),
            ..stats
        };
        let completeness = completeness(&partial.entities, schema);
        Self {
            schema_version: schema.version,
            entities: partial.entities,
            completeness,
            stats,
        }
    }

    pub fn instances(&self, kind: &str) -> &[EntityInstance] {
        self.entities.get(kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Value of a field on the first instance of a kind.
    pub fn first_value(&self, kind: &str, field: &str) -> Option<&FieldValue> {
        self.instances(kind).iter().find_map(|i| i.get(field))
    }
}

/// Share of required schema fields that are populated with a valid value.
///
/// A required field of a `Many` kind counts once and is satisfied when any
/// instance carries it. A schema without required fields scores 1.0.
pub fn completeness(entities: &BTreeMap<String, Vec<EntityInstance>>, schema: &EntitySchema) -> f64 {
    let mut required = 0usize;
    let mut satisfied = 0usize;

    for kind in &schema.kinds {
        let instances = entities.get(&kind.name).map(|v| v.as_slice()).unwrap_or(&[]);
        for field in kind.required_fields() {
            required += 1;
            let ok = instances.iter().any(|instance| {
                instance
                    .get(&field.name)
                    .is_some_and(|value| check_value(field, value).is_ok())
            });
            if ok {
                satisfied += 1;
            }
        }
    }

    if required == 0 {
        return 1.0;
    }
    satisfied as f64 / required as f64
}
