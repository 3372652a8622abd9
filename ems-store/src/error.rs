use crate::validation::ValidationErrors;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} {id} is still referenced by {dependents} {dependent_kind}")]
    Protected {
        entity: &'static str,
        id: i64,
        dependents: i64,
        dependent_kind: &'static str,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
