use thiserror::Error;

/// Errors raised by the shared netmapper types.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid host record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
