use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dates::{any_date_to_millis, format_date};
use crate::error::{ModelError, Result};

/// A typed field value in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrimitiveType {
    String {
        value: String,
    },
    Number {
        value: f64,
    },
    Boolean {
        value: bool,
    },
    /// Epoch milliseconds.
    Timestamp {
        value: i64,
    },
    /// Fuzzy date (`YYYYMMDD` or `YYYYMMDDhhmmss`).
    Datetime {
        value: i64,
    },
    Measure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Compound {
        value: BTreeMap<String, PrimitiveType>,
    },
}

impl PrimitiveType {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
        }
    }

    pub fn number(value: f64) -> Self {
        Self::Number { value }
    }

    pub fn boolean(value: bool) -> Self {
        Self::Boolean { value }
    }

    pub fn measure(value: f64, unit: impl Into<String>) -> Self {
        Self::Measure {
            value: Some(value),
            unit: Some(unit.into()),
        }
    }

    pub const fn tag(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Boolean { .. } => "boolean",
            Self::Timestamp { .. } => "timestamp",
            Self::Datetime { .. } => "datetime",
            Self::Measure { .. } => "measure",
            Self::Compound { .. } => "compound",
        }
    }

    /// Parses a `{"type": ..., "value": ...}` payload, checking that the
    /// declared tag matches the runtime type of the value.
    pub fn from_json(json: &Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| ModelError::MalformedPrimitive(format!("expected an object, got {}", json_kind(json))))?;
        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::MalformedPrimitive("missing \"type\" tag".to_string()))?;
        let payload = object.get("value").unwrap_or(&Value::Null);
        let mismatch = |found: &Value| ModelError::TagMismatch {
            tag: tag.to_string(),
            found: json_kind(found).to_string(),
        };

        match tag {
            "string" => payload
                .as_str()
                .map(Self::string)
                .ok_or_else(|| mismatch(payload)),
            "number" => payload
                .as_f64()
                .map(Self::number)
                .ok_or_else(|| mismatch(payload)),
            "boolean" => payload
                .as_bool()
                .map(Self::boolean)
                .ok_or_else(|| mismatch(payload)),
            "timestamp" => payload
                .as_i64()
                .map(|value| Self::Timestamp { value })
                .ok_or_else(|| mismatch(payload)),
            "datetime" => payload
                .as_i64()
                .map(|value| Self::Datetime { value })
                .ok_or_else(|| mismatch(payload)),
            "measure" => {
                let value = match payload {
                    Value::Null => None,
                    Value::Number(number) => number.as_f64(),
                    other => return Err(mismatch(other)),
                };
                let unit = match object.get("unit") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(unit)) => Some(unit.clone()),
                    Some(other) => return Err(mismatch(other)),
                };
                Ok(Self::Measure { value, unit })
            }
            "compound" => {
                let entries = payload.as_object().ok_or_else(|| mismatch(payload))?;
                let value = entries
                    .iter()
                    .map(|(label, nested)| Ok((label.clone(), Self::from_json(nested)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(Self::Compound { value })
            }
            other => Err(ModelError::UnknownTag(other.to_string())),
        }
    }

    /// The value as seen by formulas.
    ///
    /// Measures are normalized to their base unit, dates become epoch
    /// milliseconds and compounds become arrays. With `to_string` every
    /// scalar is rendered as display text instead.
    pub fn parse(&self, to_string: bool) -> Option<Value> {
        match self {
            Self::Measure { value, unit } => {
                let value = (*value)?;
                Some(if to_string {
                    Value::String(format!("{value} {}", unit.as_deref().unwrap_or_default()))
                } else {
                    Value::from(normalize_unit(value, unit.as_deref()))
                })
            }
            Self::Datetime { value } | Self::Timestamp { value } => {
                if to_string {
                    format_date(*value).map(Value::String)
                } else {
                    any_date_to_millis(*value).map(Value::from)
                }
            }
            Self::Number { value } => Some(if to_string {
                Value::String(value.to_string())
            } else {
                Value::from(*value)
            }),
            Self::Boolean { value } => Some(if to_string {
                Value::String(value.to_string())
            } else {
                Value::Bool(*value)
            }),
            Self::String { value } => Some(Value::String(value.clone())),
            Self::Compound { value } => Some(Value::Array(
                value
                    .values()
                    .filter_map(|nested| nested.parse(to_string))
                    .collect(),
            )),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Converts a measure to the base unit of its dimension (kg, l, m, s).
pub fn normalize_unit(value: f64, unit: Option<&str>) -> f64 {
    match unit.unwrap_or_default() {
        "g" => value / 1_000.0,
        "mg" => value / 1_000_000.0,
        "ml" => value / 1_000.0,
        "cl" => value / 100.0,
        "cm" => value / 100.0,
        "mm" => value / 1_000.0,
        "min" => value * 60.0,
        "h" => value * 3_600.0,
        "d" => value * 86_400.0,
        "week" => value * 604_800.0,
        "month" => value * 2_592_000.0,
        "year" => value * 31_557_600.0,
        _ => value,
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rejects_mismatched_tag() {
        let err = PrimitiveType::from_json(&json!({"type": "number", "value": "x"})).unwrap_err();
        assert_eq!(
            err,
            ModelError::TagMismatch {
                tag: "number".to_string(),
                found: "string".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_tag() {
        assert_eq!(
            PrimitiveType::from_json(&json!({"type": "blob", "value": 1})).unwrap_err(),
            ModelError::UnknownTag("blob".to_string())
        );
    }

    #[test]
    fn parses_nested_compound() {
        let parsed = PrimitiveType::from_json(&json!({
            "type": "compound",
            "value": {
                "systolic": {"type": "measure", "value": 120, "unit": "mmHg"},
                "note": {"type": "string", "value": "seated"}
            }
        }))
        .unwrap();
        let PrimitiveType::Compound { value } = &parsed else {
            panic!("expected a compound, got {parsed:?}");
        };
        assert_eq!(value["systolic"], PrimitiveType::measure(120.0, "mmHg"));
        assert_eq!(parsed.tag(), "compound");
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = PrimitiveType::measure(75.0, "kg").to_json();
        assert_eq!(json, json!({"type": "measure", "value": 75.0, "unit": "kg"}));
        let back: PrimitiveType = serde_json::from_value(json).unwrap();
        assert_eq!(back, PrimitiveType::measure(75.0, "kg"));
    }

    #[test]
    fn parse_normalizes_units() {
        assert_eq!(
            PrimitiveType::measure(1500.0, "g").parse(false),
            Some(json!(1.5))
        );
        assert_eq!(
            PrimitiveType::measure(75.0, "kg").parse(true),
            Some(json!("75 kg"))
        );
        assert_eq!(PrimitiveType::number(3.0).parse(true), Some(json!("3")));
        assert_eq!(
            PrimitiveType::Measure {
                value: None,
                unit: Some("kg".to_string())
            }
            .parse(false),
            None
        );
    }
}
