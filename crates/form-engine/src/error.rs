use form_model::ModelError;
use form_store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A literal payload failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a single formula evaluation.
///
/// Cloneable so that one shared evaluation can report to every awaiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("no formula registered for \"{0}\"")]
    UnknownFormula(String),
    #[error("invalid argument for {helper}: {message}")]
    InvalidArgument { helper: String, message: String },
    #[error("\"{0}\" is not a helper")]
    UnknownHelper(String),
    #[error("formula failed: {0}")]
    Failed(String),
}
