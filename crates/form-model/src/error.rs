use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A code id that does not split into `type|code|version`.
    #[error("attempted to normalize from a malformed code id \"{0}\"")]
    InvalidCode(String),
    #[error("could not reconstruct the code: type and code are required")]
    IncompleteCode,
    /// The declared `type` tag of a primitive does not match its payload.
    #[error("primitive tagged \"{tag}\" cannot hold a {found} value")]
    TagMismatch { tag: String, found: String },
    #[error("unknown primitive tag \"{0}\"")]
    UnknownTag(String),
    #[error("malformed primitive: {0}")]
    MalformedPrimitive(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
