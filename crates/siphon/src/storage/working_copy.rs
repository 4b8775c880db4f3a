//! Scoped working copy of a stored object.
//!
//! The transformation logic never touches the backing store directly; it
//! reads a local temporary copy that is removed when the guard drops,
//! including on transformation errors.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StorageError;

/// A local temporary copy of one stored object. Dropping the value
/// deletes the temporary file.
pub struct WorkingCopy {
    key: String,
    file: NamedTempFile,
}

impl WorkingCopy {
    /// Fills a working copy by draining the reader.
    pub(crate) fn from_reader<R: Read>(key: &str, mut reader: R) -> Result<Self, StorageError> {
        let mut file = NamedTempFile::new().map_err(|e| StorageError::AccessDenied {
            key: key.to_string(),
            source: e,
        })?;
        std::io::copy(&mut reader, file.as_file_mut()).map_err(|e| {
            StorageError::AccessDenied {
                key: key.to_string(),
                source: e,
            }
        })?;
        file.as_file_mut()
            .seek(SeekFrom::Start(0))
            .map_err(|e| StorageError::AccessDenied {
                key: key.to_string(),
                source: e,
            })?;
        Ok(Self {
            key: key.to_string(),
            file,
        })
    }

    /// Fills a working copy from in-memory bytes.
    pub(crate) fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut file = NamedTempFile::new().map_err(|e| StorageError::AccessDenied {
            key: key.to_string(),
            source: e,
        })?;
        file.as_file_mut()
            .write_all(bytes)
            .and_then(|_| file.as_file_mut().seek(SeekFrom::Start(0)).map(|_| ()))
            .map_err(|e| StorageError::AccessDenied {
                key: key.to_string(),
                source: e,
            })?;
        Ok(Self {
            key: key.to_string(),
            file,
        })
    }

    /// The storage key this copy was materialized from.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Filesystem path of the temporary copy. Valid until drop.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Reads the whole copy into memory.
    pub fn read(&self) -> Result<Vec<u8>, StorageError> {
        std::fs::read(self.file.path()).map_err(|e| StorageError::AccessDenied {
            key: self.key.clone(),
            source: e,
        })
    }
}
