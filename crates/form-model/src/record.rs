//! Store-level clinical records: contacts, sub-contacts, services and forms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::code::CodeStub;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Measure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// The value of a service in one language. At most one member is
/// meaningful.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instant_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_date_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_value: Option<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound_value: Option<Vec<Service>>,
}

impl Content {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn number(value: f64) -> Self {
        Self {
            number_value: Some(value),
            ..Self::default()
        }
    }
}

/// One field value with its metadata, as recorded in a contact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub content: BTreeMap<String, Content>,
    #[serde(default)]
    pub codes: Vec<CodeStub>,
    #[serde(default)]
    pub tags: Vec<CodeStub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    /// Soft-deletion timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_life: Option<i64>,
}

impl Service {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            label: Some(label.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_content(mut self, language: impl Into<String>, content: Content) -> Self {
        self.content.insert(language.into(), content);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.end_of_life.is_some()
    }
}

/// Store-side metadata of a service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<Vec<CodeStub>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<CodeStub>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLink {
    pub service_id: String,
}

/// Binds services of a contact to a form instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceLink>,
}

impl SubContact {
    pub fn for_form(form_id: impl Into<String>) -> Self {
        Self {
            form_id: Some(form_id.into()),
            ..Self::default()
        }
    }

    pub fn links(&self, service_id: &str) -> bool {
        self.services.iter().any(|link| link.service_id == service_id)
    }
}

/// A snapshot of the clinical encounter. `rev == None` marks the live,
/// uncommitted contact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub sub_contacts: Vec<SubContact>,
}

impl Contact {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
            ..Self::default()
        }
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|service| service.id.as_deref() == Some(id))
    }

    /// True when a sub-contact binds `service_id` to `form_id`.
    pub fn anchors(&self, form_id: &str, service_id: &str) -> bool {
        self.sub_contacts
            .iter()
            .any(|sc| sc.form_id.as_deref() == Some(form_id) && sc.links(service_id))
    }
}

/// A form instance: a template rendered under an anchor of its parent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<String>,
    /// Display label of the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl FormInstance {
    pub fn new(id: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            template_id: Some(template_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_descr(mut self, descr: impl Into<String>) -> Self {
        self.descr = Some(descr.into());
        self
    }
}
