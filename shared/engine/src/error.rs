#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("invalid field path {field:?}: {reason}")]
    InvalidField { field: String, reason: &'static str },
    #[error("document {0:?} is not a JSON object")]
    NotAnObject(String),
    #[error("store backend error: {0}")]
    Backend(String),
}
