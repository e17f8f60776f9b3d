use form_model::ModelError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The history handed to a node contains its own live contact.
    #[error("the contact history must not contain the current contact")]
    HistoryContainsCurrent,
    #[error("no service id could be derived for field \"{label}\"")]
    MissingServiceId { label: String },
    #[error("form {0} has no id")]
    MissingFormId(String),
    #[error("form factory failed: {0}")]
    Factory(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
