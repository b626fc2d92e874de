//! Namespaced local key-value store.
//!
//! Persists the state the surrounding application restores across sessions:
//! connection config, the curated model list, the serialized provenance
//! tables, search history and per-channel collapse state. Values are opaque
//! JSON; each entry carries an updated-at timestamp so cached search results
//! can be rejected after the staleness window.
//!
//! Single JSON file on disk, written whole on every save. The store is tiny
//! (operator-scale, not dataset-scale) so the simple format wins over an
//! append log here.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Staleness window for timestamp-guarded reads.
pub const SEARCH_CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Well-known store keys. All reads and writes go through these so the
/// namespace stays greppable.
pub mod keys {
    pub const CONNECTION_CONFIG: &str = "relaymap.connection";
    pub const CURATED_LIST: &str = "relaymap.curatedList";
    pub const PROVENANCE_LABELS: &str = "relaymap.provenance.labels";
    pub const PROVENANCE_RECORDS: &str = "relaymap.provenance.records";
    pub const SEARCH_HISTORY: &str = "relaymap.searchHistory";
    pub const SEARCH_CACHE_PREFIX: &str = "relaymap.searchCache.";
    pub const COLLAPSE_STATE: &str = "relaymap.collapseState";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    value: Value,
    /// Milliseconds since the Unix epoch.
    updated_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
    entries: BTreeMap<String, StoredEntry>,
}

impl KvStore {
    /// Open the store at `path`, creating an empty one if the file is
    /// missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::store(format!("corrupt store {}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Serialize `value` under `key` and persist to disk.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let entry = StoredEntry {
            value: serde_json::to_value(value)?,
            updated_at_ms: Utc::now().timestamp_millis(),
        };
        self.entries.insert(key.to_string(), entry);
        self.flush()
    }

    /// Read `key`, ignoring age.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => Ok(Some(serde_json::from_value(entry.value.clone())?)),
        }
    }

    /// Read `key` only if it was written within `ttl_ms`. Stale entries
    /// read as absent.
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &str, ttl_ms: i64) -> Result<Option<T>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => {
                let age = Utc::now().timestamp_millis() - entry.updated_at_ms;
                if age > ttl_ms {
                    return Ok(None);
                }
                Ok(Some(serde_json::from_value(entry.value.clone())?))
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Keys currently present, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    fn flush(&self) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let encoded = serde_json::to_string_pretty(&self.entries)?;
        // Write-then-rename so a crash mid-save never truncates the store.
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        std::fs::write(tmp.path(), encoded)?;
        tmp.into_temp_path()
            .persist(&self.path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    #[cfg(test)]
    fn backdate(&mut self, key: &str, ms: i64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.updated_at_ms -= ms;
        }
    }
}

/// Default store location under the user's data directory.
#[must_use]
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaymap")
        .join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn set_get_remove_round_trip_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let mut store = KvStore::open(&path).expect("open");
        store
            .set(keys::CURATED_LIST, &vec!["gpt-4o".to_string()])
            .expect("set");

        // Reopen from disk.
        let store2 = KvStore::open(&path).expect("reopen");
        assert_eq!(store2.keys(), vec![keys::CURATED_LIST]);
        let list: Option<Vec<String>> = store2.get(keys::CURATED_LIST).expect("get");
        assert_eq!(list, Some(vec!["gpt-4o".to_string()]));

        store.remove(keys::CURATED_LIST).expect("remove");
        let store3 = KvStore::open(&path).expect("reopen");
        let list: Option<Vec<String>> = store3.get(keys::CURATED_LIST).expect("get");
        assert_eq!(list, None);
    }

    #[test]
    fn stale_entries_read_as_absent() {
        let dir = tempdir().expect("tempdir");
        let mut store = KvStore::open(dir.path().join("store.json")).expect("open");
        let key = format!("{}gpt", keys::SEARCH_CACHE_PREFIX);
        store.set(&key, &vec!["gpt-4o".to_string()]).expect("set");

        let fresh: Option<Vec<String>> =
            store.get_fresh(&key, SEARCH_CACHE_TTL_MS).expect("fresh");
        assert!(fresh.is_some());

        store.backdate(&key, SEARCH_CACHE_TTL_MS + 1000);
        let stale: Option<Vec<String>> =
            store.get_fresh(&key, SEARCH_CACHE_TTL_MS).expect("stale");
        assert!(stale.is_none());
        // Plain get still sees it.
        let raw: Option<Vec<String>> = store.get(&key).expect("get");
        assert!(raw.is_some());
    }

    #[test]
    fn corrupt_store_file_is_an_error_not_a_panic() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(KvStore::open(&path).is_err());
    }
}
