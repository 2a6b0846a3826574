//! Persisted-preference port.
//!
//! The platform super-admin's last-selected active company survives
//! restarts through this key-value store. Writes are idempotent
//! last-write-wins and reads happen only when a super-admin role is
//! committed, so no locking beyond the interior mutex is needed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// The single fixed key the impersonation override lives under.
pub const ACTIVE_COMPANY_KEY: &str = "saas_active_company";

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
}

/// In-memory backend for tests and the offline demo.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// JSON-file backend, the native analogue of browser local storage.
///
/// IO failures are logged and otherwise swallowed: losing the remembered
/// impersonation target degrades to the super-admin picking a company
/// again, never to an authorization failure.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn flush(&self, entries: &HashMap<String, String>) {
        let serialized = match serde_json::to_string_pretty(entries) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize preference store");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, serialized) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to persist preferences");
        }
    }
}

impl PreferenceStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        self.flush(&entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get(ACTIVE_COMPANY_KEY), None);

        store.set(ACTIVE_COMPANY_KEY, r#"{"id":"c1","name":"Acme"}"#);
        assert_eq!(
            store.get(ACTIVE_COMPANY_KEY).as_deref(),
            Some(r#"{"id":"c1","name":"Acme"}"#)
        );

        store.delete(ACTIVE_COMPANY_KEY);
        assert_eq!(store.get(ACTIVE_COMPANY_KEY), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let store = FileStore::open(&path);
        store.set(ACTIVE_COMPANY_KEY, r#"{"id":"c1","name":null}"#);
        drop(store);

        let reopened = FileStore::open(&path);
        assert_eq!(
            reopened.get(ACTIVE_COMPANY_KEY).as_deref(),
            Some(r#"{"id":"c1","name":null}"#)
        );
    }

    #[test]
    fn file_store_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.json"));
        assert_eq!(store.get("anything"), None);
    }
}
