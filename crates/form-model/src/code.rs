//! Coded concepts.
//!
//! Domain values carry [`Code`]s (an id plus translated labels). Store records
//! carry [`CodeStub`]s whose `type`, `code` and `version` parts are
//! authoritative; the id is always rederived as `type|code|version`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A code attached to a field value or to its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Code {
    pub id: String,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
}

impl Code {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.label.insert(language.into(), text.into());
        self
    }

    /// The `code` segment of a `type|code|version` id.
    pub fn code_part(&self) -> Option<&str> {
        self.id.split('|').nth(1)
    }
}

/// Store-level code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStub {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub code_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
}

impl CodeStub {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn new(
        code_type: impl Into<String>,
        code: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let (code_type, code, version) = (code_type.into(), code.into(), version.into());
        Self {
            id: Some(format!("{code_type}|{code}|{version}")),
            code_type: Some(code_type),
            code: Some(code),
            version: Some(version),
            label: BTreeMap::new(),
        }
    }

    /// Returns a copy whose `type`, `code` and `version` are filled in and
    /// whose id is rederived from them.
    ///
    /// Missing parts are reconstructed from the id. A code with a type and a
    /// code but no version gets version `"1"`.
    pub fn normalize(&self) -> Result<CodeStub> {
        let mut normalized = self.clone();
        let has_parts = normalized.code_type.is_some() && normalized.code.is_some();

        if has_parts && normalized.version.is_some() {
            // authoritative fields already present
        } else if let Some(id) = normalized.id.as_deref() {
            let parts: Vec<&str> = id.split('|').collect();
            let (id_type, id_code, id_version) = match parts.as_slice() {
                [t, c, v] if !t.is_empty() && !c.is_empty() && !v.is_empty() => (*t, *c, *v),
                [t, c] if !t.is_empty() && !c.is_empty() => (*t, *c, "1"),
                _ => return Err(ModelError::InvalidCode(id.to_string())),
            };
            let (id_type, id_code, id_version) =
                (id_type.to_string(), id_code.to_string(), id_version.to_string());
            normalized.code_type.get_or_insert(id_type);
            normalized.code.get_or_insert(id_code);
            normalized.version.get_or_insert(id_version);
        } else if has_parts {
            normalized.version = Some("1".to_string());
        } else {
            return Err(ModelError::IncompleteCode);
        }

        normalized.id = Some(format!(
            "{}|{}|{}",
            normalized.code_type.as_deref().unwrap_or_default(),
            normalized.code.as_deref().unwrap_or_default(),
            normalized.version.as_deref().unwrap_or_default(),
        ));
        Ok(normalized)
    }

    fn parts(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        let mut id_parts = self.id.as_deref().map(|id| id.split('|'));
        let mut next = || id_parts.as_mut().and_then(Iterator::next);
        let (id_type, id_code, id_version) = (next(), next(), next());
        (
            self.code_type.as_deref().or(id_type),
            self.code.as_deref().or(id_code),
            self.version.as_deref().or(id_version),
        )
    }

    /// True when both stubs designate the same `type|code|version`.
    pub fn same_concept(&self, other: &CodeStub) -> bool {
        self.parts() == other.parts()
    }
}

pub fn normalize_codes(codes: &[CodeStub]) -> Result<Vec<CodeStub>> {
    codes.iter().map(CodeStub::normalize).collect()
}

/// Order-insensitive equality of two code lists.
pub fn are_codes_equal(left: &[CodeStub], right: &[CodeStub]) -> bool {
    left.iter().all(|l| right.iter().any(|r| l.same_concept(r)))
        && right.iter().all(|r| left.iter().any(|l| l.same_concept(r)))
}

impl From<&CodeStub> for Code {
    fn from(stub: &CodeStub) -> Self {
        let id = stub.id.clone().unwrap_or_else(|| {
            let (code_type, code, version) = stub.parts();
            format!(
                "{}|{}|{}",
                code_type.unwrap_or_default(),
                code.unwrap_or_default(),
                version.unwrap_or_default()
            )
        });
        Self {
            id,
            label: stub.label.clone(),
        }
    }
}

impl From<&Code> for CodeStub {
    fn from(code: &Code) -> Self {
        Self {
            id: Some(code.id.clone()),
            label: code.label.clone(),
            ..Self::default()
        }
    }
}
