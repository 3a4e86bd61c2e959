use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Validation failed for {entity}: {details}")]
    ValidationError { entity: String, details: String },

    #[error("Entity not found: {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: String, end: String },

    #[error("Invariant violated for {entity}: {details}")]
    InvariantViolation { entity: String, details: String },

    #[error("Storage error ({kind}): {message}")]
    StorageError {
        kind: crate::storage::StorageErrorKind,
        message: String,
    },

    #[error("Fetch failed for {table}: {details}")]
    FetchError { table: String, details: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "rest")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl RollupError {
    pub fn validation(entity: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ValidationError {
            entity: entity.into(),
            details: details.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RollupError>;
