use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    TextList,
    Number,
    Date,
    Enum,
    Reference,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TextList => "text_list",
            Self::Number => "number",
            Self::Date => "date",
            Self::Enum => "enum",
            Self::Reference => "reference",
        }
    }
}

/// One allowed value of an enumerated field, with the spellings that map to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyTerm {
    pub value: String,
    pub synonyms: Vec<String>,
}

impl VocabularyTerm {
    pub fn new(value: &str, synonyms: &[&str]) -> Self {
        Self {
            value: value.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: String,
    /// Lower bound for numbers.
    pub min: Option<f64>,
    /// Closed vocabulary for enums.
    pub vocabulary: Vec<VocabularyTerm>,
    /// Inclusive plausible year range for dates.
    pub year_range: Option<(i32, i32)>,
    /// Candidate label patterns, highest priority first. Matched
    /// case-insensitively against whole `Label:` prefixes and table headers.
    pub labels: Vec<String>,
    /// Narrative patterns with one capture group holding the value. Case
    /// sensitivity is up to the pattern.
    pub cues: Vec<String>,
}

pub const DEFAULT_YEAR_RANGE: (i32, i32) = (1950, 2100);

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            description: String::new(),
            min: None,
            vocabulary: Vec::new(),
            year_range: (field_type == FieldType::Date).then_some(DEFAULT_YEAR_RANGE),
            labels: Vec::new(),
            cues: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn vocabulary(mut self, terms: Vec<VocabularyTerm>) -> Self {
        self.vocabulary = terms;
        self
    }

    #[must_use]
    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn cues(mut self, cues: &[&str]) -> Self {
        self.cues = cues.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Many,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityKindSpec {
    pub name: String,
    pub description: String,
    pub cardinality: Cardinality,
    /// Field whose value identifies an instance of a `Many` kind.
    pub identity: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl EntityKindSpec {
    pub fn single(name: &str, description: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            cardinality: Cardinality::Single,
            identity: None,
            fields,
        }
    }

    pub fn many(name: &str, description: &str, identity: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            cardinality: Cardinality::Many,
            identity: Some(identity.to_string()),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub version: u32,
    pub kinds: Vec<EntityKindSpec>,
}

impl EntitySchema {
    pub fn kind(&self, name: &str) -> Option<&EntityKindSpec> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn required_field_count(&self) -> usize {
        self.kinds.iter().map(|k| k.required_fields().count()).sum()
    }

    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Compact description sent to the understanding service. Patterns are
    /// local matching aids and are left out.
    pub fn describe(&self) -> serde_json::Value {
        let kinds: Vec<serde_json::Value> = self
            .kinds
            .iter()
            .map(|kind| {
                let fields: serde_json::Map<String, serde_json::Value> = kind
                    .fields
                    .iter()
                    .map(|f| {
                        let mut spec = json!({
                            "type": f.field_type.as_str(),
                            "required": f.required,
                            "description": f.description,
                        });
                        if !f.vocabulary.is_empty() {
                            spec["allowed"] =
                                json!(f.vocabulary.iter().map(|t| &t.value).collect::<Vec<_>>());
                        }
                        if let Some(min) = f.min {
                            spec["min"] = json!(min);
                        }
                        if f.field_type == FieldType::Date {
                            spec["format"] = json!("YYYY-MM-DD");
                        }
                        (f.name.clone(), spec)
                    })
                    .collect();
                json!({
                    "kind": kind.name,
                    "description": kind.description,
                    "cardinality": kind.cardinality,
                    "fields": fields,
                })
            })
            .collect();

        json!({ "schema_version": self.version, "entities": kinds })
    }

    /// Schema v1: device context, target population, clinical evidence and
    /// complaint records.
    pub fn builtin_v1() -> Self {
        let device = EntityKindSpec::single(
            "DeviceContext",
            "Identification and intended purpose of the medical device",
            vec![
                FieldSpec::new("device_name", FieldType::Text)
                    .required()
                    .describe("Trade or product name of the device")
                    .labels(&[
                        r"device\s+(?:trade\s+)?name",
                        r"product\s+name",
                        r"trade\s+name",
                        r"name\s+of\s+(?:the\s+)?device",
                        r"device",
                    ])
                    .cues(&[r"\b[Tt]he\s+([A-Z][\w\-®™]*(?:\s+[A-Z0-9][\w\-®™]*){0,4})\s+is\s+an?\s+(?:[\w\-]+\s+){0,4}?(?:device|system|stent|catheter|implant|instrument)\b"]),
                FieldSpec::new("manufacturer", FieldType::Text)
                    .required()
                    .describe("Legal manufacturer")
                    .labels(&[r"(?:legal\s+)?manufacturer(?:\s+name)?", r"manufactured\s+by", r"company"])
                    .cues(&[r"\b(?i:manufactured)\s+by\s+([A-Z][\w&.,\- ]{2,80}?)(?:[.;]\s|[.;]?$)"]),
                FieldSpec::new("device_class", FieldType::Enum)
                    .required()
                    .describe("Risk class under the MDR")
                    .vocabulary(vec![
                        VocabularyTerm::new("I", &["class i", "class 1"]),
                        VocabularyTerm::new("IIa", &["class iia", "class 2a", "2a"]),
                        VocabularyTerm::new("IIb", &["class iib", "class 2b", "2b"]),
                        VocabularyTerm::new("III", &["class iii", "class 3"]),
                    ])
                    .labels(&[r"(?:device\s+|risk\s+)?class(?:ification)?", r"risk\s+class"])
                    .cues(&[r"(?i)\bclass\s+(IIa|IIb|III|I)\b"]),
                FieldSpec::new("intended_purpose", FieldType::Text)
                    .required()
                    .describe("Intended purpose or intended use statement")
                    .labels(&[r"intended\s+(?:purpose|use)", r"indications?\s+for\s+use"])
                    .cues(&[r"(?i)\bis\s+intended\s+(?:to\s+be\s+used\s+)?(?:for|to)\s+([^.]{10,300})\."]),
                FieldSpec::new("basic_udi_di", FieldType::Reference)
                    .describe("Basic UDI-DI")
                    .labels(&[r"basic\s+udi[\s\-]?di", r"udi[\s\-]?di", r"udi"]),
                FieldSpec::new("model_numbers", FieldType::TextList)
                    .describe("Models, variants or catalogue numbers covered")
                    .labels(&[
                        r"models?(?:\s+(?:numbers?|names?))?",
                        r"catalog(?:ue)?\s+numbers?",
                        r"variants?",
                    ]),
                FieldSpec::new("first_market_date", FieldType::Date)
                    .describe("Date the device was first placed on the market")
                    .labels(&[
                        r"(?:date\s+of\s+)?first\s+(?:marketed|market\s+date|placed\s+on\s+(?:the\s+)?market)",
                        r"ce\s+mark(?:ing)?\s+date",
                        r"market\s+introduction(?:\s+date)?",
                    ]),
                FieldSpec::new("regulatory_route", FieldType::Text)
                    .describe("Conformity assessment route or regulatory status")
                    .labels(&[
                        r"regulatory\s+(?:route|pathway|status)",
                        r"conformity\s+assessment(?:\s+route)?",
                    ]),
            ],
        );

        let population = EntityKindSpec::single(
            "PatientPopulation",
            "Patients the device is intended for",
            vec![
                FieldSpec::new("target_population", FieldType::Text)
                    .required()
                    .describe("Target patient population")
                    .labels(&[
                        r"target\s+(?:patient\s+)?population",
                        r"(?:intended\s+)?patient\s+population",
                        r"intended\s+population",
                    ])
                    .cues(&[r"(?i)\bintended\s+for\s+(?:use\s+in\s+)?((?:adult|paediatric|pediatric|elderly|neonatal)[^.]{0,200})\."]),
                FieldSpec::new("age_range", FieldType::Text)
                    .required()
                    .describe("Age range of the target population")
                    .labels(&[r"age(?:\s+(?:range|group))?", r"patient\s+age"])
                    .cues(&[
                        r"(?i)\baged?\s+(\d{1,3}\s*(?:-|–|to)\s*\d{1,3}(?:\s+years)?)",
                        r"(?i)\b(\d{1,3}\s+years\s+(?:and|or)\s+(?:older|above))",
                    ]),
                FieldSpec::new("clinical_conditions", FieldType::TextList)
                    .describe("Conditions or diseases treated")
                    .labels(&[r"(?:clinical|medical|target)\s+conditions?", r"diseases?"]),
                FieldSpec::new("contraindications", FieldType::TextList)
                    .describe("Contraindications")
                    .labels(&[r"contra[\s\-]?indications?"]),
                FieldSpec::new("estimated_size", FieldType::Number)
                    .describe("Estimated number of patients")
                    .min(0.0)
                    .labels(&[
                        r"(?:estimated\s+)?(?:population|patient)\s+size",
                        r"number\s+of\s+patients\s+treated",
                    ]),
            ],
        );

        let evidence = EntityKindSpec::many(
            "ClinicalEvidenceItem",
            "A clinical study, publication or follow-up data source",
            "title",
            vec![
                FieldSpec::new("title", FieldType::Text)
                    .required()
                    .describe("Title or citation of the evidence")
                    .labels(&[r"(?:study\s+)?title", r"study(?:\s+name)?", r"publication", r"citation", r"reference"]),
                FieldSpec::new("evidence_type", FieldType::Enum)
                    .required()
                    .describe("Kind of evidence")
                    .vocabulary(vec![
                        VocabularyTerm::new(
                            "clinical_investigation",
                            &["clinical investigation", "clinical study", "clinical trial", "trial", "rct"],
                        ),
                        VocabularyTerm::new(
                            "literature",
                            &["literature", "literature review", "publication", "article", "review"],
                        ),
                        VocabularyTerm::new(
                            "pmcf",
                            &["pmcf", "post-market clinical follow-up", "registry", "follow-up"],
                        ),
                        VocabularyTerm::new("equivalence", &["equivalent device", "equivalence"]),
                    ])
                    .labels(&[r"(?:evidence|study|data|source)\s+type", r"type\s+of\s+(?:evidence|study)"]),
                FieldSpec::new("population_size", FieldType::Number)
                    .describe("Number of subjects")
                    .min(0.0)
                    .labels(&[
                        r"(?:sample|population|cohort)\s+size",
                        r"number\s+of\s+(?:patients|subjects)",
                        r"n",
                        r"patients",
                    ]),
                FieldSpec::new("outcome_summary", FieldType::Text)
                    .describe("Main outcomes or conclusions")
                    .labels(&[r"outcomes?(?:\s+summary)?", r"results?", r"conclusions?", r"findings"]),
                FieldSpec::new("publication_date", FieldType::Date)
                    .describe("Publication or completion date")
                    .labels(&[r"publication\s+date", r"(?:publication\s+)?year", r"published"]),
            ],
        );

        let complaints = EntityKindSpec::many(
            "ComplaintRecord",
            "A post-market complaint",
            "complaint_id",
            vec![
                FieldSpec::new("complaint_id", FieldType::Reference)
                    .required()
                    .describe("Complaint number")
                    .labels(&[
                        r"complaint\s+(?:number|id|no\.?|#)",
                        r"case\s+(?:number|id)",
                        r"id",
                    ]),
                FieldSpec::new("received_date", FieldType::Date)
                    .required()
                    .describe("Date the complaint was received")
                    .labels(&[
                        r"date\s+(?:entered|received)",
                        r"receipt\s+date",
                        r"entry\s+date",
                        r"received",
                    ]),
                FieldSpec::new("complaint_type", FieldType::Enum)
                    .describe("Complaint category")
                    .vocabulary(vec![
                        VocabularyTerm::new("malfunction", &["device malfunction", "failure", "defect"]),
                        VocabularyTerm::new("injury", &["serious injury", "adverse event"]),
                        VocabularyTerm::new("death", &["fatality"]),
                        VocabularyTerm::new("use_error", &["use error", "user error"]),
                        VocabularyTerm::new("other", &["labeling", "labelling", "packaging"]),
                    ])
                    .labels(&[r"complaint\s+type", r"event\s+type", r"type", r"classification"]),
                FieldSpec::new("description", FieldType::Text)
                    .describe("Event description")
                    .labels(&[r"(?:event\s+)?description", r"details", r"summary"]),
                FieldSpec::new("country", FieldType::Text)
                    .describe("Country where the event occurred")
                    .labels(&[r"country(?:\s+of\s+origin)?", r"market", r"region"]),
                FieldSpec::new("quantity", FieldType::Number)
                    .describe("Number of units affected")
                    .min(0.0)
                    .labels(&[r"quantity", r"qty", r"units(?:\s+affected)?"]),
            ],
        );

        Self {
            version: 1,
            kinds: vec![device, population, evidence, complaints],
        }
    }
}

/// Versioned schemas known to this process.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<u32, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(EntitySchema::builtin_v1());
        registry
    }

    /// Replaces any schema registered under the same version.
    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.version, Arc::new(schema));
    }

    pub fn get(&self, version: u32) -> Option<Arc<EntitySchema>> {
        self.schemas.get(&version).cloned()
    }

    pub fn latest(&self) -> Option<Arc<EntitySchema>> {
        self.schemas.values().next_back().cloned()
    }

    pub fn versions(&self) -> Vec<u32> {
        self.schemas.keys().copied().collect()
    }
}
