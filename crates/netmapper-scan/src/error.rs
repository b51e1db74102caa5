//! Error types for the netmapper-scan crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Core(#[from] netmapper_core::CoreError),

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Worker for {host} panicked: {reason}")]
    WorkerPanicked { host: String, reason: String },

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
