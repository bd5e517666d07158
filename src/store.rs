//! Persistent key-value store behind a narrow trait.
//!
//! The engine persists exactly two things: the cycle counter and the
//! last-rendered region values, so a warm reboot resumes diffing against
//! what is physically on the glass. Absence on first boot is the valid
//! "unset" state, never an error.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Store key for the persisted cycle counter.
pub const KEY_CYCLE_COUNTER: &str = "cycle_counter";
/// Store key for the persisted region state map.
pub const KEY_REGION_STATE: &str = "region_state";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store IO: {0}")]
    Io(#[from] io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Best-effort string key-value storage.
pub trait PersistentStore {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Volatile store for tests and for running without writable storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One JSON object on disk holding every entry. Rewritten whole on each
/// put; the file is tiny (two keys) and the write is per-cycle at most.
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Open (or start) the store at `path`. A missing file is the valid
    /// first-boot state; a corrupt file is discarded with a warning rather
    /// than wedging startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    eprintln!("Warning: corrupt state file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("missing"), None);

        store.put(KEY_CYCLE_COUNTER, "3").unwrap();
        assert_eq!(store.get(KEY_CYCLE_COUNTER).as_deref(), Some("3"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = FileStore::open(&path);
        store.put(KEY_CYCLE_COUNTER, "7").unwrap();
        store.put(KEY_REGION_STATE, "{\"time\":\"10:00\"}").unwrap();
        drop(store);

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get(KEY_CYCLE_COUNTER).as_deref(), Some("7"));
        assert_eq!(
            reopened.get(KEY_REGION_STATE).as_deref(),
            Some("{\"time\":\"10:00\"}")
        );
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("never-written.json"));
        assert_eq!(store.get(KEY_CYCLE_COUNTER), None);
    }

    #[test]
    fn corrupt_file_opens_empty_instead_of_failing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{{{ not json").unwrap();

        let store = FileStore::open(&path);
        assert_eq!(store.get(KEY_CYCLE_COUNTER), None);
    }
}
