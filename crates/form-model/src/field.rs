//! Domain-facing field values and their metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::code::Code;
use crate::error::{ModelError, Result};
use crate::primitive::PrimitiveType;
use crate::version::RevisionsFilter;

/// Language key used by computed values before they are bound to a language.
pub const ANY_LANGUAGE: &str = "*";

/// The value of a field: one primitive per language plus codes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldValue {
    pub content: BTreeMap<String, PrimitiveType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<Code>,
}

impl FieldValue {
    pub fn new(language: impl Into<String>, value: PrimitiveType) -> Self {
        Self {
            content: BTreeMap::from([(language.into(), value)]),
            codes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_codes(mut self, codes: Vec<Code>) -> Self {
        self.codes = codes;
        self
    }

    /// Parses a `{content: {lang: primitive}, codes?: [...]}` payload,
    /// validating every primitive tag.
    pub fn from_json(json: &Value) -> Result<Self> {
        let content = json
            .get("content")
            .and_then(Value::as_object)
            .ok_or_else(|| ModelError::MalformedPrimitive("field value without content".to_string()))?
            .iter()
            .map(|(language, primitive)| Ok((language.clone(), PrimitiveType::from_json(primitive)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let codes = match json.get("codes") {
            None | Some(Value::Null) => Vec::new(),
            Some(codes) => serde_json::from_value(codes.clone())
                .map_err(|e| ModelError::MalformedPrimitive(format!("invalid codes: {e}")))?,
        };
        Ok(Self { content, codes })
    }

    /// Converts the raw result of a formula into a field value keyed by
    /// [`ANY_LANGUAGE`]. Returns `None` for results with no field
    /// representation (null, unparseable objects, empty arrays of those).
    pub fn from_raw(raw: &Value) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::Bool(value) => Some(Self::new(ANY_LANGUAGE, PrimitiveType::boolean(*value))),
            Value::Number(number) => number
                .as_f64()
                .map(|value| Self::new(ANY_LANGUAGE, PrimitiveType::number(value))),
            Value::String(value) => Some(Self::new(ANY_LANGUAGE, PrimitiveType::string(value.as_str()))),
            Value::Array(items) => {
                let mut compound = BTreeMap::new();
                let mut codes = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let Some(mut nested) = Self::from_raw(item) else {
                        continue;
                    };
                    let key = nested
                        .codes
                        .first()
                        .map_or_else(|| index.to_string(), |code| code.id.clone());
                    if let Some(primitive) = nested.content.remove(ANY_LANGUAGE) {
                        compound.insert(key, primitive);
                    }
                    nested.codes.append(&mut codes);
                    codes = nested.codes;
                }
                Some(Self::new(ANY_LANGUAGE, PrimitiveType::Compound { value: compound }).with_codes(codes))
            }
            Value::Object(object) => {
                if object.contains_key("content") {
                    Self::from_json(raw).ok()
                } else if object.contains_key("type") {
                    PrimitiveType::from_json(raw)
                        .ok()
                        .map(|primitive| Self::new(ANY_LANGUAGE, primitive))
                } else if let (Some(value), Some(unit)) = (
                    object.get("value").and_then(Value::as_f64),
                    object.get("unit"),
                ) {
                    let unit = match unit {
                        Value::String(unit) => unit.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    Some(Self::new(ANY_LANGUAGE, PrimitiveType::measure(value, unit)))
                } else {
                    None
                }
            }
        }
    }

    /// Binds a computed value to `language`: the wildcard entry becomes the
    /// entry for `language` unless one already exists, then is dropped.
    #[must_use]
    pub fn localize(mut self, language: &str) -> Self {
        if let Some(any) = self.content.remove(ANY_LANGUAGE) {
            self.content.entry(language.to_string()).or_insert(any);
        }
        self
    }

    /// The primitive for `language`, falling back to the wildcard and then
    /// to any language.
    pub fn primitive(&self, language: &str) -> Option<&PrimitiveType> {
        self.content
            .get(language)
            .or_else(|| self.content.get(ANY_LANGUAGE))
            .or_else(|| self.content.values().next())
    }
}

/// Metadata of a field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Fuzzy date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<i64>,
    /// Data owner responsible for the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Code>>,
}

impl FieldMetadata {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_value_date(mut self, value_date: i64) -> Self {
        self.value_date = Some(value_date);
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<Code>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// A formula whose truthiness decides whether the field is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub validation: String,
    pub message: String,
}

impl Validator {
    pub fn new(validation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            validation: validation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidators {
    pub metadata: FieldMetadata,
    pub validators: Vec<Validator>,
}

/// A computed field: the formula is evaluated and its result written to the
/// field whose values `revisions_filter` selects.
#[derive(Clone)]
pub struct FieldFormula {
    pub metadata: FieldMetadata,
    pub revisions_filter: RevisionsFilter,
    pub formula: String,
}

impl FieldFormula {
    pub fn new(
        metadata: FieldMetadata,
        revisions_filter: RevisionsFilter,
        formula: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            revisions_filter,
            formula: formula.into(),
        }
    }
}

impl fmt::Debug for FieldFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldFormula")
            .field("metadata", &self.metadata)
            .field("formula", &self.formula)
            .finish_non_exhaustive()
    }
}
