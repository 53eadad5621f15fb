use async_trait::async_trait;
use dashmap::DashMap;
use ingest::{Chunk, Table};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ExtractResult;
use crate::model::{EntityInstance, PartialEntityBundle, Provenance, Strategy};
use crate::normalizer::{coerce_str, is_absent_str};
use crate::patterns::{FieldRef, PatternSet, split_label_line};
use crate::schema::{Cardinality, EntitySchema};
use crate::validation::admit;
use crate::EntityExtractor;

/// Local pattern matching over a chunk. No network, always available.
///
/// Three passes, in this order, so that explicit labels outrank prose:
/// `Label: value` lines, tables, then narrative cue patterns.
pub struct HeuristicExtractor {
    compiled: DashMap<u32, Arc<PatternSet>>,
}

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self {
            compiled: DashMap::new(),
        }
    }

    fn patterns(&self, schema: &EntitySchema) -> ExtractResult<Arc<PatternSet>> {
        if let Some(p) = self.compiled.get(&schema.version) {
            return Ok(p.clone());
        }
        let compiled = Arc::new(PatternSet::compile(schema)?);
        self.compiled.insert(schema.version, compiled.clone());
        Ok(compiled)
    }

    pub fn extract_chunk(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
        let patterns = self.patterns(schema)?;
        let provenance = Provenance::for_chunk(Strategy::Heuristic, chunk);
        let mut scan = Scan::new(schema);

        // Step 1: labelled lines
        for segment in &chunk.segments {
            for line in segment.text.lines() {
                let Some((label, value)) = split_label_line(line) else {
                    continue;
                };
                if is_absent_str(value) {
                    continue;
                }
                if let Some(at) = patterns.match_label(label) {
                    scan.offer(at, value, &provenance);
                }
            }
        }
        scan.close_records();

        // Step 2: tables
        for table in &chunk.tables {
            let table_provenance = provenance.clone().with_table(table);
            self.scan_table(&patterns, &mut scan, table, &table_provenance);
        }

        // Step 3: narrative cues, single-instance kinds only
        for segment in &chunk.segments {
            let text = segment.text.replace('\n', " ");
            for (at, re) in patterns.cues() {
                if schema.kinds[at.kind].cardinality != Cardinality::Single || scan.has(at) {
                    continue;
                }
                if let Some(value) = re.captures(&text).and_then(|c| c.get(1)) {
                    scan.offer(at, value.as_str(), &provenance);
                }
            }
        }

        let bundle = scan.finish();
        debug!(
            chunk = chunk.index,
            fields = bundle.populated_field_count(),
            "Heuristic extraction complete"
        );
        Ok(bundle)
    }

    fn scan_table(&self, patterns: &PatternSet, scan: &mut Scan<'_>, table: &Table, provenance: &Provenance) {
        let Some(header) = table.header() else {
            return;
        };

        if let Some(map) = patterns.match_header(header, scan.schema.kinds.len()) {
            for row in table.body_rows() {
                for (col, at) in &map.columns {
                    if let Some(cell) = row.get(*col) {
                        if !is_absent_str(cell) {
                            scan.offer(*at, cell, provenance);
                        }
                    }
                }
                scan.close_records();
            }
            return;
        }

        // Key/value layout: first column holds labels.
        if table.column_count() == 2 {
            for row in &table.rows {
                if let [label, value] = row.as_slice() {
                    if is_absent_str(value) {
                        continue;
                    }
                    if let Some(at) = patterns.match_label(label) {
                        scan.offer(at, value, provenance);
                    }
                }
            }
            scan.close_records();
        }
    }
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityExtractor for HeuristicExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Heuristic
    }

    async fn extract(&self, chunk: &Chunk, schema: &EntitySchema) -> ExtractResult<PartialEntityBundle> {
        self.extract_chunk(chunk, schema)
    }
}

/// Instances being filled while one chunk is scanned.
struct Scan<'a> {
    schema: &'a EntitySchema,
    singles: BTreeMap<usize, EntityInstance>,
    /// Open record per `Many` kind. A repeated field starts a new record.
    records: BTreeMap<usize, EntityInstance>,
    bundle: PartialEntityBundle,
}

impl<'a> Scan<'a> {
    fn new(schema: &'a EntitySchema) -> Self {
        Self {
            schema,
            singles: BTreeMap::new(),
            records: BTreeMap::new(),
            bundle: PartialEntityBundle::new(),
        }
    }

    fn has(&self, at: FieldRef) -> bool {
        let name = &self.schema.kinds[at.kind].fields[at.field].name;
        self.singles.get(&at.kind).is_some_and(|i| i.has(name))
    }

    fn offer(&mut self, at: FieldRef, raw: &str, provenance: &Provenance) {
        let schema = self.schema;
        let kind = &schema.kinds[at.kind];
        let field = &kind.fields[at.field];

        let instance = match kind.cardinality {
            Cardinality::Single => self.singles.entry(at.kind).or_default(),
            Cardinality::Many => {
                if self.records.get(&at.kind).is_some_and(|r| r.has(&field.name)) {
                    if let Some(done) = self.records.remove(&at.kind) {
                        self.bundle.add(kind, done);
                    }
                }
                self.records.entry(at.kind).or_default()
            }
        };

        admit(instance, field, coerce_str(field, raw), provenance);
    }

    fn close_records(&mut self) {
        for (kind, record) in std::mem::take(&mut self.records) {
            self.bundle.add(&self.schema.kinds[kind], record);
        }
    }

    fn finish(mut self) -> PartialEntityBundle {
        self.close_records();
        for (kind, instance) in std::mem::take(&mut self.singles) {
            self.bundle.add(&self.schema.kinds[kind], instance);
        }
        self.bundle
    }
}
