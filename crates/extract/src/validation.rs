use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::model::{EntityInstance, FieldValue, PopulatedField, Provenance, RejectedField};
use crate::schema::{EntityKindSpec, FieldSpec, FieldType};

const MAX_REFERENCE_CHARS: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Fields that are present and pass their constraints.
    pub populated: Vec<String>,
    /// Present fields that fail, with the reason.
    pub invalid: Vec<(String, String)>,
    /// Required fields with no valid value.
    pub missing_required: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty() && self.missing_required.is_empty()
    }
}

/// Check every field of an instance against its kind. Pure; the instance
/// is not modified.
pub fn validate(instance: &EntityInstance, spec: &EntityKindSpec) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (name, populated) in &instance.fields {
        match spec.field(name) {
            Some(field) => match check_value(field, &populated.value) {
                Ok(()) => result.populated.push(name.clone()),
                Err(reason) => result.invalid.push((name.clone(), reason)),
            },
            None => result
                .invalid
                .push((name.clone(), format!("not a field of {}", spec.name))),
        }
    }

    for field in spec.required_fields() {
        if !result.populated.contains(&field.name) {
            result.missing_required.push(field.name.clone());
        }
    }

    result
}

/// Type and constraint check for one value.
pub fn check_value(spec: &FieldSpec, value: &FieldValue) -> Result<(), String> {
    match (spec.field_type, value) {
        (FieldType::Text, FieldValue::Text(s)) => non_blank(s),
        (FieldType::TextList, FieldValue::TextList(items)) => {
            if items.is_empty() {
                return Err("empty list".to_string());
            }
            items.iter().try_for_each(|s| non_blank(s))
        }
        (FieldType::Number, FieldValue::Number(n)) => {
            if !n.is_finite() {
                return Err("not a finite number".to_string());
            }
            match spec.min {
                Some(min) if *n < min => Err(format!("{n} is below the minimum {min}")),
                _ => Ok(()),
            }
        }
        (FieldType::Date, FieldValue::Date(d)) => match spec.year_range {
            Some((lo, hi)) if d.year() < lo || d.year() > hi => {
                Err(format!("year {} outside {lo}..={hi}", d.year()))
            }
            _ => Ok(()),
        },
        (FieldType::Enum, FieldValue::Enum(v)) => {
            if spec.vocabulary.iter().any(|t| &t.value == v) {
                Ok(())
            } else {
                Err(format!("'{v}' is not in the vocabulary"))
            }
        }
        (FieldType::Reference, FieldValue::Reference(r)) => {
            non_blank(r)?;
            if r.chars().count() > MAX_REFERENCE_CHARS {
                return Err("reference too long".to_string());
            }
            if !r.chars().any(|c| c.is_alphanumeric()) {
                return Err("reference has no identifier characters".to_string());
            }
            Ok(())
        }
        (expected, _) => Err(format!("expected a {} value", expected.as_str())),
    }
}

/// Store a coerced candidate on an instance if it passes validation,
/// otherwise record it as rejected. An existing value is never replaced.
pub(crate) fn admit(
    instance: &mut EntityInstance,
    spec: &FieldSpec,
    coerced: Result<FieldValue, String>,
    provenance: &Provenance,
) -> bool {
    if instance.has(&spec.name) {
        return false;
    }
    match coerced.and_then(|value| check_value(spec, &value).map(|()| value)) {
        Ok(value) => instance.set_if_empty(
            &spec.name,
            PopulatedField {
                value,
                provenance: provenance.clone(),
            },
        ),
        Err(reason) => {
            instance.reject(RejectedField {
                field: spec.name.clone(),
                reason,
                provenance: provenance.clone(),
            });
            false
        }
    }
}

fn non_blank(s: &str) -> Result<(), String> {
    if s.trim().is_empty() {
        Err("blank text".to_string())
    } else {
        Ok(())
    }
}
