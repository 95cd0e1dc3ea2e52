//! Durable key/value store behind `$persistentStore`
//!
//! The whole map is read once at startup and rewritten in full on every
//! mutation, as a flat JSON object of string keys to string values.
//! Last write wins; there is no coordination between processes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::common::paths::ensure_parent_dir;
use crate::common::{Error, Result};

/// JSON-file backed string map
#[derive(Debug)]
pub struct PersistedStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl PersistedStore {
    /// Load the store from `path`
    ///
    /// A missing file is an empty store. A file that cannot be read or parsed
    /// is reported and treated as empty, so a corrupt store never blocks a run.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to load persistent store: {}", e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `value` under `key` and flush
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value.to_string());
        save_entries(&self.path, &entries)
    }

    /// Value stored under `key`, if any
    pub fn read(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Remove every entry and flush the empty map
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.lock();
        entries.clear();
        save_entries(&self.path, &entries)
    }

    /// Copy of all entries
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::store(path, e))?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&content).map_err(|e| Error::store(path, e))?;

    // Older stores may hold raw JSON values; keep them as their JSON text.
    Ok(raw
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

fn save_entries(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)?;
    ensure_parent_dir(path).map_err(|e| Error::store(path, e))?;

    // Write to a sibling temp file and rename so a crash never truncates the store.
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::store(path, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| Error::store(path, e))?;
    tmp.persist(path).map_err(|e| Error::store(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = PersistedStore::open(dir.path().join("store.json"));

        store.write("username", "alice").unwrap();
        store.write("empty", "").unwrap();
        assert_eq!(store.read("username").as_deref(), Some("alice"));
        assert_eq!(store.read("empty").as_deref(), Some(""));
        assert_eq!(store.read("missing"), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = PersistedStore::open(&path);
            store.write("k", "v1").unwrap();
            store.write("k", "v2").unwrap();
        }
        let reopened = PersistedStore::open(&path);
        assert_eq!(reopened.read("k").as_deref(), Some("v2"));
    }

    #[test]
    fn test_clear_persists_empty_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = PersistedStore::open(&path);
        store.write("a", "1").unwrap();
        store.write("b", "2").unwrap();
        store.clear().unwrap();

        assert_eq!(store.read("a"), None);
        assert_eq!(store.read("b"), None);
        assert!(PersistedStore::open(&path).entries().is_empty());
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({}));
    }

    #[test]
    fn test_non_string_values_are_loaded_as_json_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"count": 3, "obj": {"a": 1}, "s": "x"}"#).unwrap();

        let store = PersistedStore::open(&path);
        assert_eq!(store.read("count").as_deref(), Some("3"));
        assert_eq!(store.read("obj").as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(store.read("s").as_deref(), Some("x"));
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let store = PersistedStore::open(&path);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_write_to_unwritable_location_fails() {
        let dir = tempdir().unwrap();
        // A directory where the store file should be makes the rename fail.
        let path = dir.path().join("store.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        let store = PersistedStore::open(&path);
        assert!(store.write("k", "v").is_err());
    }
}
