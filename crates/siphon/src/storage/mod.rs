//! Storage gateway — uniform byte storage behind a backend-agnostic trait.
//!
//! Callers above this layer treat "bytes absent" as a first-class,
//! cheaply-checkable condition (`exists`), because the dominant failure
//! mode the pipeline handles is metadata saying a file exists while
//! storage disagrees.

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::StorageError;

pub mod filesystem;
pub mod memory;
pub mod working_copy;

pub use filesystem::FsStorage;
pub use memory::MemStorage;
pub use working_copy::WorkingCopy;

/// Read/exists/write/delete over file bytes, independent of backend.
pub trait StorageGateway: Send + Sync {
    /// Whether bytes are present for the key. Never errors for a
    /// well-formed key; absent bytes are `Ok(false)`.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Materializes the object into a scoped temporary working copy,
    /// deleted on drop on every exit path. Fails with `NotFound` when
    /// bytes are absent and `AccessDenied` when present but unreadable.
    fn open_for_read(&self, key: &str) -> Result<WorkingCopy, StorageError>;

    /// Stores bytes under the key with atomic visibility: concurrent
    /// readers never observe a partially-written object.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Removes the object. Deleting an already-absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Builds the gateway named by the configuration. Backend choice is an
/// explicit constructor input, not process-wide state.
pub fn from_config(config: &StorageConfig) -> Arc<dyn StorageGateway> {
    match config {
        StorageConfig::Filesystem { root } => Arc::new(FsStorage::new(root)),
        StorageConfig::Memory => Arc::new(MemStorage::new()),
    }
}

/// Maps an arbitrary string (owner id, filename, ...) onto one safe key
/// segment. Anything outside `[A-Za-z0-9._-]` becomes '_', and segments
/// that would be empty or dot-only collapse to "file".
pub fn safe_segment(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Validates a storage key: relative, no parent-directory escapes, no
/// empty segments. Shared by the backends.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}
