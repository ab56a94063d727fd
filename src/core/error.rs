use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Revision conflict on document '{0}'")]
    Conflict(String),

    #[error("Store misconfigured: {0}")]
    Misconfigured(String),

    #[error("Gave up updating '{key}' after {attempts} conflicting attempts")]
    RetryExhausted { key: String, attempts: u32 },

    #[error("Field '{field}' is not declared on '{doc_type}'")]
    UnknownField { doc_type: String, field: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
