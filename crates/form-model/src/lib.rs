//! Data model for reactive clinical forms.
//!
//! Two layers of types live here: domain-facing values ([`FieldValue`],
//! [`FieldMetadata`], [`PrimitiveType`]) and store-level records
//! ([`Contact`], [`Service`], [`Content`]), together with the conversions
//! between them.

pub mod code;
pub mod convert;
pub mod dates;
pub mod error;
pub mod field;
pub mod primitive;
pub mod record;
pub mod version;

pub use code::{Code, CodeStub, are_codes_equal, normalize_codes};
pub use convert::{
    content_to_primitive, is_content_equal, is_service_content_equal, is_service_equal,
    primitive_to_content,
};
pub use error::{ModelError, Result};
pub use field::{ANY_LANGUAGE, FieldFormula, FieldMetadata, FieldValidators, FieldValue, Validator};
pub use primitive::{PrimitiveType, normalize_unit};
pub use record::{
    Contact, Content, FormInstance, Measure, Service, ServiceLink, ServiceMetadata, SubContact,
};
pub use version::{Revision, RevisionsFilter, Version, VersionedData, filters};
