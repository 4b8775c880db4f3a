//! In-memory storage backend.
//!
//! Used by tests and by deployments where a real backing store is not
//! wired up yet. Also supports injecting unreadable/unwritable keys so
//! the pipeline's operator-attention paths can be exercised.

use std::collections::{HashMap, HashSet};
use std::io::{Error, ErrorKind};
use std::sync::Mutex;

use crate::error::StorageError;

use super::{validate_key, StorageGateway, WorkingCopy};

#[derive(Default)]
pub struct MemStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    denied: Mutex<HashSet<String>>,
    fail_writes: Mutex<bool>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a key as present-but-unreadable. Reads of it return
    /// `AccessDenied` while `exists` keeps reporting true.
    pub fn deny(&self, key: &str) {
        self.denied.lock().unwrap().insert(key.to_string());
    }

    /// Makes every subsequent `write` fail with `WriteFailed`.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }
}

impl StorageGateway for MemStorage {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        if self.denied.lock().unwrap().contains(key) {
            return Ok(true);
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn open_for_read(&self, key: &str) -> Result<WorkingCopy, StorageError> {
        validate_key(key)?;
        if self.denied.lock().unwrap().contains(key) {
            return Err(StorageError::AccessDenied {
                key: key.to_string(),
                source: Error::new(ErrorKind::PermissionDenied, "read denied"),
            });
        }
        let objects = self.objects.lock().unwrap();
        match objects.get(key) {
            Some(bytes) => WorkingCopy::from_bytes(key, bytes),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        if *self.fail_writes.lock().unwrap() {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                source: Error::new(ErrorKind::Other, "write disabled"),
            });
        }
        // Insert under the lock: readers see the old value or the whole
        // new one.
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let storage = MemStorage::new();
        assert!(!storage.exists("k").unwrap());

        storage.write("k", b"bytes").unwrap();
        assert!(storage.exists("k").unwrap());
        assert_eq!(storage.open_for_read("k").unwrap().read().unwrap(), b"bytes");

        storage.delete("k").unwrap();
        assert!(!storage.exists("k").unwrap());
        storage.delete("k").unwrap();
    }

    #[test]
    fn test_missing_read_is_not_found() {
        let storage = MemStorage::new();
        assert!(matches!(
            storage.open_for_read("missing"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_denied_key_exists_but_is_unreadable() {
        let storage = MemStorage::new();
        storage.write("k", b"bytes").unwrap();
        storage.deny("k");

        assert!(storage.exists("k").unwrap());
        assert!(matches!(
            storage.open_for_read("k"),
            Err(StorageError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_fail_writes() {
        let storage = MemStorage::new();
        storage.fail_writes(true);
        assert!(matches!(
            storage.write("k", b"bytes"),
            Err(StorageError::WriteFailed { .. })
        ));
        storage.fail_writes(false);
        storage.write("k", b"bytes").unwrap();
    }
}
