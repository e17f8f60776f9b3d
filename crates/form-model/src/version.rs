//! Versioned data and revision filters.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::field::FieldMetadata;

/// Revision of the contact a version comes from. `None` is the live contact.
pub type Revision = Option<String>;

/// One historical state of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version<T> {
    pub revision: Revision,
    /// Epoch milliseconds.
    pub modified: i64,
    pub value: T,
}

impl<T> Version<T> {
    pub fn new(revision: Revision, modified: i64, value: T) -> Self {
        Self {
            revision,
            modified,
            value,
        }
    }

    /// Maps the carried value, keeping revision and timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Version<U> {
        Version {
            revision: self.revision,
            modified: self.modified,
            value: f(self.value),
        }
    }
}

/// Versions keyed by record id, most recent first.
pub type VersionedData<T> = BTreeMap<String, Vec<Version<T>>>;

/// Selects the visible revisions for a record id given its metadata history.
pub type RevisionsFilter = Rc<dyn Fn(&str, &[Version<FieldMetadata>]) -> Vec<Revision>>;

/// Ready-made revision filters.
pub mod filters {
    use std::rc::Rc;

    use super::{Revision, RevisionsFilter, Version};
    use crate::field::FieldMetadata;

    /// Every revision of every record.
    pub fn all() -> RevisionsFilter {
        Rc::new(|_: &str, history: &[Version<FieldMetadata>]| history.iter().map(|v| v.revision.clone()).collect())
    }

    /// Only values recorded in the live contact.
    pub fn current_only() -> RevisionsFilter {
        Rc::new(|_: &str, history: &[Version<FieldMetadata>]| {
            history
                .iter()
                .filter(|v| v.revision.is_none())
                .map(|v| v.revision.clone())
                .collect()
        })
    }

    /// The most recent revision of every record.
    pub fn latest() -> RevisionsFilter {
        Rc::new(|_: &str, history: &[Version<FieldMetadata>]| history.first().map(|v| v.revision.clone()).into_iter().collect())
    }

    /// The most recent revision of records whose latest label is `label`.
    pub fn latest_with_label(label: impl Into<String>) -> RevisionsFilter {
        let label = label.into();
        Rc::new(move |_: &str, history: &[Version<FieldMetadata>]| latest_labelled(&label, history).into_iter().collect())
    }

    /// Every revision carrying all of `tags` or, without tags, labelled `label`.
    pub fn matching(label: impl Into<String>, tags: Vec<String>) -> RevisionsFilter {
        let label = label.into();
        Rc::new(move |_: &str, history: &[Version<FieldMetadata>]| {
            history
                .iter()
                .filter(|version| {
                    if tags.is_empty() {
                        version.value.label == label
                    } else {
                        let carried = version.value.tags.as_deref().unwrap_or_default();
                        tags.iter()
                            .all(|tag| carried.iter().any(|code| &code.id == tag))
                    }
                })
                .map(|version| version.revision.clone())
                .collect()
        })
    }

    pub(crate) fn latest_labelled(
        label: &str,
        history: &[Version<FieldMetadata>],
    ) -> Option<Revision> {
        history
            .first()
            .filter(|version| version.value.label == label)
            .map(|version| version.revision.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Code;

    fn history() -> Vec<Version<FieldMetadata>> {
        vec![
            Version::new(None, 30, FieldMetadata::new("weight")),
            Version::new(
                Some("2-b".to_string()),
                20,
                FieldMetadata::new("weight").with_tags(vec![Code::new("CD-ITEM|weight|1")]),
            ),
            Version::new(Some("1-a".to_string()), 10, FieldMetadata::new("poids")),
        ]
    }

    #[test]
    fn latest_keeps_first_revision() {
        assert_eq!(filters::latest()("s1", &history()), vec![None]);
        assert_eq!(
            filters::latest_with_label("poids")("s1", &history()),
            Vec::<Revision>::new()
        );
        assert_eq!(filters::latest_with_label("weight")("s1", &history()), vec![None]);
    }

    #[test]
    fn current_only_drops_committed_revisions() {
        assert_eq!(filters::current_only()("s1", &history()), vec![None]);
        assert_eq!(filters::all()("s1", &history()).len(), 3);
    }

    #[test]
    fn matching_prefers_tags_over_label() {
        assert_eq!(
            filters::matching("weight", vec![])("s1", &history()),
            vec![None, Some("2-b".to_string())]
        );
        assert_eq!(
            filters::matching("ignored", vec!["CD-ITEM|weight|1".to_string()])("s1", &history()),
            vec![Some("2-b".to_string())]
        );
    }
}
