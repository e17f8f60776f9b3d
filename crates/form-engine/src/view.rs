//! Domain view of a store node.

use form_model::{
    Code, CodeStub, FieldMetadata, FieldValue, Revision, Service, ServiceMetadata, Version,
    VersionedData, content_to_primitive, primitive_to_content,
};
use form_store::FormNode;

/// Creation time of the displayed contact. Versions recorded after it are
/// hidden; `None` shows everything.
pub(crate) fn cutoff(node: &FormNode, as_of: Option<i64>) -> Option<i64> {
    let created = as_of.unwrap_or(node.current().created);
    (created != 0).then_some(created)
}

pub(crate) fn field_values(
    node: &FormNode,
    cutoff: Option<i64>,
    filter: &dyn Fn(&str, &[Version<FieldMetadata>]) -> Vec<Revision>,
) -> VersionedData<FieldValue> {
    node.values(|id, history| {
        let visible: Vec<Version<FieldMetadata>> = history
            .iter()
            .filter(|version| cutoff.is_none_or(|cutoff| version.modified <= cutoff))
            .map(|version| version.clone().map(|meta| to_field_metadata(&meta)))
            .collect();
        filter(id, &visible)
    })
    .into_iter()
    .map(|(id, versions)| {
        let versions = versions
            .into_iter()
            .map(|version| version.map(|service| to_field_value(&service)))
            .collect();
        (id, versions)
    })
    .collect()
}

pub(crate) fn to_field_value(service: &Service) -> FieldValue {
    FieldValue {
        content: service
            .content
            .iter()
            .filter_map(|(language, content)| {
                content_to_primitive(language, content).map(|primitive| (language.clone(), primitive))
            })
            .collect(),
        codes: service.codes.iter().map(Code::from).collect(),
    }
}

pub(crate) fn to_service(value: &FieldValue) -> Service {
    Service {
        content: value
            .content
            .iter()
            .map(|(language, primitive)| (language.clone(), primitive_to_content(language, primitive)))
            .collect(),
        codes: value.codes.iter().map(CodeStub::from).collect(),
        ..Service::default()
    }
}

pub(crate) fn to_field_metadata(meta: &ServiceMetadata) -> FieldMetadata {
    FieldMetadata {
        label: meta.label.clone(),
        index: None,
        value_date: meta.value_date,
        owner: meta.responsible.clone(),
        tags: meta
            .tags
            .as_ref()
            .map(|tags| tags.iter().map(Code::from).collect()),
    }
}

pub(crate) fn to_service_metadata(meta: &FieldMetadata) -> ServiceMetadata {
    ServiceMetadata {
        label: meta.label.clone(),
        responsible: meta.owner.clone(),
        value_date: meta.value_date,
        codes: None,
        tags: meta
            .tags
            .as_ref()
            .map(|tags| tags.iter().map(CodeStub::from).collect()),
    }
}
