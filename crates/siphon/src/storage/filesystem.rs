//! Local-filesystem storage backend.
//!
//! Writes go to a temporary sibling inside the root, then an atomic
//! rename publishes them. Readers either see the previous object or the
//! complete new one, never a partial write.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::StorageError;

use super::{validate_key, StorageGateway, WorkingCopy};

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl StorageGateway for FsStorage {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            // Bytes may exist but be unreachable (e.g. permissions on a
            // parent). Report present; open_for_read surfaces the
            // distinguishable AccessDenied.
            Err(_) => Ok(true),
        }
    }

    fn open_for_read(&self, key: &str) -> Result<WorkingCopy, StorageError> {
        let path = self.resolve(key)?;
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::AccessDenied {
                    key: key.to_string(),
                    source: e,
                }
            }
        })?;
        WorkingCopy::from_reader(key, file)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            source: e,
        })?;

        // Stage in the destination directory so the final rename stays on
        // one filesystem and is atomic.
        let mut staged =
            NamedTempFile::new_in(parent).map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                source: e,
            })?;
        staged
            .write_all(bytes)
            .and_then(|_| staged.as_file_mut().sync_all())
            .map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                source: e,
            })?;

        staged.persist(&path).map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            source: e.error,
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_exists_and_read() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(!storage.exists("uploads/u1/data.csv").unwrap());
        storage.write("uploads/u1/data.csv", b"a,b\n1,2\n").unwrap();
        assert!(storage.exists("uploads/u1/data.csv").unwrap());

        let copy = storage.open_for_read("uploads/u1/data.csv").unwrap();
        assert_eq!(copy.read().unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn test_write_overwrites_atomically() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.write("k.bin", b"first").unwrap();
        storage.write("k.bin", b"second").unwrap();

        let copy = storage.open_for_read("k.bin").unwrap();
        assert_eq!(copy.read().unwrap(), b"second");

        // Staging files must not be left behind next to the object.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_open_for_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        match storage.open_for_read("missing.csv") {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "missing.csv"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.write("k.bin", b"bytes").unwrap();
        storage.delete("k.bin").unwrap();
        assert!(!storage.exists("k.bin").unwrap());
        // Second delete of an absent key succeeds.
        storage.delete("k.bin").unwrap();
    }

    #[test]
    fn test_malformed_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        for key in ["../escape", "/abs", "a/../b", ""] {
            assert!(matches!(
                storage.exists(key),
                Err(StorageError::InvalidKey(_))
            ));
            assert!(matches!(
                storage.write(key, b"x"),
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_working_copy_is_independent_of_store() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.write("k.csv", b"original").unwrap();
        let copy = storage.open_for_read("k.csv").unwrap();

        // Deleting the stored object does not invalidate the copy.
        storage.delete("k.csv").unwrap();
        assert_eq!(copy.read().unwrap(), b"original");
    }
}
