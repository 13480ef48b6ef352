use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Malformed input bundle: {0}")]
    MalformedBundle(String),

    #[error("Invalid consumption tolerance {0}: must be between 0.0 and 1.0")]
    InvalidTolerance(f64),

    #[error("Invalid validation settings: {0}")]
    InvalidSettings(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
