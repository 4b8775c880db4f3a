use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiphonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors from the storage gateway.
///
/// The variants mirror the conditions callers must distinguish:
/// `NotFound` is user-recoverable (re-upload), `AccessDenied` and
/// `WriteFailed` need operator attention, `InvalidKey` is a caller bug.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No object in storage for key '{0}'")]
    NotFound(String),

    #[error("Object for key '{key}' exists but could not be read: {source}")]
    AccessDenied {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object for key '{key}': {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete object for key '{key}': {source}")]
    DeleteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed storage key '{0}'")]
    InvalidKey(String),
}

/// Errors from the pluggable transformation.
///
/// Every message here is shown to the end user as-is, so variants carry
/// actionable wording rather than internal diagnostics.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("file is not valid UTF-8 text")]
    NotUtf8,

    #[error("file contains no data rows")]
    Empty,

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, SiphonError>;
