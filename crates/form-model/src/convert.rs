//! Conversions between store records and domain values.

use std::collections::BTreeMap;

use crate::code::are_codes_equal;
use crate::primitive::PrimitiveType;
use crate::record::{Content, Measure, Service};

pub fn primitive_to_content(language: &str, value: &PrimitiveType) -> Content {
    match value {
        PrimitiveType::String { value } => Content::string(value.as_str()),
        PrimitiveType::Number { value } => Content::number(*value),
        PrimitiveType::Boolean { value } => Content {
            boolean_value: Some(*value),
            ..Content::default()
        },
        PrimitiveType::Timestamp { value } => Content {
            instant_value: Some(*value),
            ..Content::default()
        },
        PrimitiveType::Datetime { value } => Content {
            fuzzy_date_value: Some(*value),
            ..Content::default()
        },
        PrimitiveType::Measure { value, unit } => Content {
            measure_value: Some(Measure {
                value: *value,
                unit: unit.clone(),
            }),
            ..Content::default()
        },
        PrimitiveType::Compound { value } => Content {
            compound_value: Some(
                value
                    .iter()
                    .map(|(label, nested)| Service {
                        label: Some(label.clone()),
                        content: BTreeMap::from([(
                            language.to_string(),
                            primitive_to_content(language, nested),
                        )]),
                        ..Service::default()
                    })
                    .collect(),
            ),
            ..Content::default()
        },
    }
}

/// Reads the first meaningful member of `content`, in the order number,
/// measure, string, fuzzy date, boolean, instant, compound.
pub fn content_to_primitive(language: &str, content: &Content) -> Option<PrimitiveType> {
    if let Some(value) = content.number_value {
        return Some(PrimitiveType::number(value));
    }
    if let Some(measure) = content
        .measure_value
        .as_ref()
        .filter(|m| m.value.is_some() || m.unit.as_deref().is_some_and(|u| !u.is_empty()))
    {
        return Some(PrimitiveType::Measure {
            value: measure.value,
            unit: measure.unit.clone(),
        });
    }
    if let Some(value) = content.string_value.as_deref().filter(|s| !s.is_empty()) {
        return Some(PrimitiveType::string(value));
    }
    if let Some(value) = content.fuzzy_date_value.filter(|v| *v != 0) {
        return Some(PrimitiveType::Datetime { value });
    }
    if let Some(value) = content.boolean_value {
        return Some(PrimitiveType::boolean(value));
    }
    if let Some(value) = content.instant_value.filter(|v| *v != 0) {
        return Some(PrimitiveType::Timestamp { value });
    }
    content.compound_value.as_ref().map(|services| PrimitiveType::Compound {
        value: services
            .iter()
            .filter_map(|service| {
                let label = service.label.clone()?;
                let nested = service
                    .content
                    .get(language)
                    .and_then(|c| content_to_primitive(language, c))?;
                Some((label, nested))
            })
            .collect(),
    })
}

/// Structural equality of contents. Absent and empty strings are alike, as
/// are absent and zero instants; compound values compare as sets.
pub fn is_content_equal(left: Option<&Content>, right: Option<&Content>) -> bool {
    let (left, right) = match (left, right) {
        (None, None) => return true,
        (Some(left), Some(right)) => (left, right),
        _ => return false,
    };
    let non_empty = |s: &Option<String>| s.as_deref().filter(|s| !s.is_empty()).map(str::to_owned);
    let non_zero = |v: Option<i64>| v.filter(|v| *v != 0);

    left.boolean_value == right.boolean_value
        && left.fuzzy_date_value == right.fuzzy_date_value
        && non_zero(left.instant_value) == non_zero(right.instant_value)
        && non_empty(&left.string_value) == non_empty(&right.string_value)
        && left.number_value == right.number_value
        && left.measure_value == right.measure_value
        && match (&left.compound_value, &right.compound_value) {
            (None, None) => true,
            (Some(l), Some(r)) => {
                l.iter().all(|s1| r.iter().any(|s2| is_service_equal(s1, s2)))
                    && r.iter().all(|s2| l.iter().any(|s1| is_service_equal(s1, s2)))
            }
            _ => false,
        }
}

/// Compares the languages of `left` against `right`.
pub fn is_service_content_equal(
    left: &BTreeMap<String, Content>,
    right: &BTreeMap<String, Content>,
) -> bool {
    left.iter()
        .all(|(language, content)| is_content_equal(Some(content), right.get(language)))
}

pub fn is_service_equal(left: &Service, right: &Service) -> bool {
    left.id == right.id
        && left.value_date == right.value_date
        && are_codes_equal(&left.codes, &right.codes)
        && is_service_content_equal(&left.content, &right.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_round_trip() {
        let primitive = PrimitiveType::Compound {
            value: BTreeMap::from([
                ("systolic".to_string(), PrimitiveType::measure(120.0, "mmHg")),
                ("diastolic".to_string(), PrimitiveType::measure(80.0, "mmHg")),
            ]),
        };
        let content = primitive_to_content("en", &primitive);
        assert_eq!(content.compound_value.as_ref().map(Vec::len), Some(2));
        assert_eq!(content_to_primitive("en", &content), Some(primitive));
    }

    #[test]
    fn empty_content_has_no_primitive() {
        assert_eq!(content_to_primitive("en", &Content::default()), None);
        assert_eq!(content_to_primitive("en", &Content::string("")), None);
    }

    #[test]
    fn empty_strings_equal_absent_strings() {
        let blank = Content::string("");
        assert!(is_content_equal(Some(&blank), Some(&Content::default())));
        assert!(!is_content_equal(Some(&blank), None));
        assert!(!is_content_equal(
            Some(&Content::string("a")),
            Some(&Content::string("b"))
        ));
    }

    #[test]
    fn compound_contents_compare_as_sets() {
        let a = Service::new("a", "A").with_content("en", Content::number(1.0));
        let b = Service::new("b", "B").with_content("en", Content::number(2.0));
        let left = Content {
            compound_value: Some(vec![a.clone(), b.clone()]),
            ..Content::default()
        };
        let right = Content {
            compound_value: Some(vec![b, a]),
            ..Content::default()
        };
        assert!(is_content_equal(Some(&left), Some(&right)));
    }
}
