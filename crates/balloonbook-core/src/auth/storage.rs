use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Storage file name in the data directory
pub const STORAGE_FILE: &str = "storage.json";

/// Extension of the scratch file a write goes through before the rename
const TMP_EXTENSION: &str = "json.tmp";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Synchronous string key-value persistence.
///
/// Implementations must make every successful `set`/`remove`/`clear` visible to
/// a fresh instance opened over the same backing resource.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn clear(&mut self) -> Result<(), StorageError>;

    /// Write several keys. Stores that cannot apply a batch at once write them
    /// in the given order and stop at the first failure.
    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys, in order, stopping at the first failure.
    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

/// A JSON object on disk holding every key.
///
/// The file is re-read on each call so separate instances over the same path
/// observe each other's writes. There is no locking: concurrent writers race
/// and the last write wins. Each write replaces the whole file through a
/// rename, so a batch lands completely or not at all.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `<dir>/storage.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORAGE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension(TMP_EXTENSION);
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut all = self.read_all()?;
        for (key, value) in entries {
            all.insert(key.to_string(), value.to_string());
        }
        self.write_all(&all)
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        let mut all = self.read_all()?;
        let before = all.len();
        for key in keys {
            all.remove(*key);
        }
        if all.len() != before {
            self.write_all(&all)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        if self.path.exists() {
            debug!(path = ?self.path, "Removing storage file");
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_remove() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));

        store.remove("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::in_dir(dir.path());
        store.set("soop_id", "abc").unwrap();

        let reopened = FileStore::in_dir(dir.path());
        assert_eq!(reopened.get("soop_id").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn test_file_store_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join(STORAGE_FILE));
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join(STORAGE_FILE);
        let mut store = FileStore::new(path.clone());
        store.set("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_file_store_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::in_dir(dir.path());
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));

        store.clear().unwrap();
        assert!(!store.path().exists());
        assert_eq!(store.get("b").unwrap(), None);

        // Clearing an already-absent file is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::in_dir(dir.path());
        store.set("keep", "1").unwrap();
        store.set_many(&[("a", "x"), ("b", "y")]).unwrap();

        let reopened = FileStore::in_dir(dir.path());
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("x"));
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("y"));

        store.remove_many(&["a", "b", "missing"]).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
        assert_eq!(reopened.get("b").unwrap(), None);
        assert_eq!(reopened.get("keep").unwrap().as_deref(), Some("1"));
        assert!(!dir.path().join("storage.json.tmp").exists());
    }

    #[test]
    fn test_file_store_batch_on_corrupt_file_leaves_it_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORAGE_FILE);
        std::fs::write(&path, "not json").unwrap();

        let mut store = FileStore::in_dir(dir.path());
        assert!(store.set_many(&[("a", "x")]).is_err());
        assert!(store.remove_many(&["a"]).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn test_memory_store_batches() {
        let mut store = MemoryStore::new();
        store.set_many(&[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(store.len(), 2);
        store.remove_many(&["a", "b"]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORAGE_FILE), "not json").unwrap();
        let store = FileStore::in_dir(dir.path());
        assert!(matches!(store.get("a"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_file_store_unreadable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        std::fs::create_dir(dir.path().join(STORAGE_FILE)).unwrap();
        let store = FileStore::in_dir(dir.path());
        assert!(matches!(store.get("a"), Err(StorageError::Io(_))));
    }
}
