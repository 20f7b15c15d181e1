use anyhow::{Context, Result};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use uuid::Uuid;

pub const CONF_HOST: &str = "host";

pub type EntryData = Map<String, Value>;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    User,
    Import,
}

/// A persisted, configured controller
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub entry_id: Uuid,
    pub version: u32,
    pub title: String,
    pub unique_id: Option<String>,
    pub source: EntrySource,
    pub data: EntryData,
}

impl ConfigEntry {
    pub const VERSION: u32 = 1;

    pub fn host(&self) -> Option<&str> {
        self.data.get(CONF_HOST).and_then(Value::as_str)
    }
}

/// Conflicts detected while committing an entry
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EntryStoreError {
    #[error("unique id {0} already configured")]
    DuplicateUniqueId(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub title: String,
    pub unique_id: Option<String>,
    pub source: EntrySource,
    pub data: EntryData,
}

/// Duplicate detection and persistence of config entries
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait EntryStore {
    fn entries(&self) -> Vec<ConfigEntry>;

    fn entry(&self, entry_id: &Uuid) -> Option<ConfigEntry>;

    /// True if any entry's data contains every key/value pair of `criteria`
    fn has_match(&self, criteria: &EntryData) -> bool;

    fn has_unique_id(&self, unique_id: &str) -> bool;

    fn create_entry(&self, entry: NewEntry) -> Result<ConfigEntry>;

    fn remove_entry(&self, entry_id: &Uuid) -> Result<Option<ConfigEntry>>;
}

/// Entry store persisting all entries into a single JSON file
#[derive(Debug)]
pub struct JsonEntryStore {
    path: PathBuf,
    entries: Mutex<Vec<ConfigEntry>>,
}

impl JsonEntryStore {
    /// Open the store at `path`, loading existing entries if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .context(format!("failed to deserialize entries: {path:?}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no entries file found at {path:?}");
                Vec::new()
            }
            Err(e) => return Err(e).context(format!("failed to read entries: {path:?}")),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConfigEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write all entries to a temporary file and atomically rename it into place
    fn persist(&self, entries: &[ConfigEntry]) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");

        serde_json::to_writer_pretty(
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .context(format!("failed to open entries file for write: {tmp_path:?}"))?,
            entries,
        )
        .context(format!("failed to serialize entries: {tmp_path:?}"))?;

        fs::rename(&tmp_path, &self.path)
            .context(format!("failed to rename {tmp_path:?} to {:?}", self.path))
    }
}

impl EntryStore for JsonEntryStore {
    fn entries(&self) -> Vec<ConfigEntry> {
        self.lock().clone()
    }

    fn entry(&self, entry_id: &Uuid) -> Option<ConfigEntry> {
        self.lock().iter().find(|e| e.entry_id == *entry_id).cloned()
    }

    fn has_match(&self, criteria: &EntryData) -> bool {
        self.lock().iter().any(|entry| {
            criteria
                .iter()
                .all(|(key, value)| entry.data.get(key) == Some(value))
        })
    }

    fn has_unique_id(&self, unique_id: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.unique_id.as_deref() == Some(unique_id))
    }

    fn create_entry(&self, entry: NewEntry) -> Result<ConfigEntry> {
        let mut entries = self.lock();

        if let Some(unique_id) = &entry.unique_id {
            if entries
                .iter()
                .any(|e| e.unique_id.as_ref() == Some(unique_id))
            {
                return Err(EntryStoreError::DuplicateUniqueId(unique_id.clone()).into());
            }
        }

        let created = ConfigEntry {
            entry_id: Uuid::new_v4(),
            version: ConfigEntry::VERSION,
            title: entry.title,
            unique_id: entry.unique_id,
            source: entry.source,
            data: entry.data,
        };

        entries.push(created.clone());

        if let Err(e) = self.persist(&entries) {
            entries.pop();
            return Err(e);
        }

        info!("created entry {} ({})", created.entry_id, created.title);
        Ok(created)
    }

    fn remove_entry(&self, entry_id: &Uuid) -> Result<Option<ConfigEntry>> {
        let mut entries = self.lock();

        let Some(index) = entries.iter().position(|e| e.entry_id == *entry_id) else {
            debug!("entry {entry_id} not found");
            return Ok(None);
        };

        let removed = entries.remove(index);

        if let Err(e) = self.persist(&entries) {
            entries.insert(index, removed);
            return Err(e);
        }

        info!("removed entry {entry_id} ({})", removed.title);
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn host_data(host: &str) -> EntryData {
        let mut data = EntryData::new();
        data.insert(CONF_HOST.to_string(), json!(host));
        data
    }

    fn new_entry(host: &str, unique_id: Option<&str>) -> NewEntry {
        NewEntry {
            title: host.to_string(),
            unique_id: unique_id.map(String::from),
            source: EntrySource::User,
            data: host_data(host),
        }
    }

    fn open_store(dir: &TempDir) -> JsonEntryStore {
        JsonEntryStore::open(dir.path().join("entries.json")).expect("should open store")
    }

    mod open {
        use super::*;

        #[test]
        fn missing_file_yields_empty_store() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            assert!(store.entries().is_empty());
        }

        #[test]
        fn corrupt_file_fails() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("entries.json");
            fs::write(&path, "not json").unwrap();

            assert!(JsonEntryStore::open(&path).is_err());
        }

        #[test]
        fn entries_survive_reopen() {
            let dir = TempDir::new().unwrap();
            let created = open_store(&dir)
                .create_entry(new_entry("http://192.0.2.5", Some("TL-001")))
                .expect("should create entry");

            let reopened = open_store(&dir);

            assert_eq!(reopened.entries(), vec![created]);
        }
    }

    mod matching {
        use super::*;

        #[test]
        fn matches_on_all_criteria() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            store
                .create_entry(new_entry("http://192.0.2.5", Some("TL-001")))
                .unwrap();

            assert!(store.has_match(&host_data("http://192.0.2.5")));
            assert!(!store.has_match(&host_data("http://192.0.2.6")));
            assert!(!store.has_match(&host_data("192.0.2.5")));
        }

        #[test]
        fn empty_criteria_match_any_entry() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            assert!(!store.has_match(&EntryData::new()));

            store
                .create_entry(new_entry("http://192.0.2.5", None))
                .unwrap();
            assert!(store.has_match(&EntryData::new()));
        }

        #[test]
        fn finds_unique_id() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            store
                .create_entry(new_entry("http://192.0.2.5", Some("TL-001")))
                .unwrap();

            assert!(store.has_unique_id("TL-001"));
            assert!(!store.has_unique_id("TL-002"));
        }
    }

    mod create {
        use super::*;

        #[test]
        fn assigns_id_and_version() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);

            let entry = store
                .create_entry(new_entry("http://192.0.2.5", Some("TL-001")))
                .unwrap();

            assert_eq!(entry.version, ConfigEntry::VERSION);
            assert_eq!(entry.title, "http://192.0.2.5");
            assert_eq!(entry.host(), Some("http://192.0.2.5"));
            assert_eq!(store.entry(&entry.entry_id), Some(entry));
        }

        #[test]
        fn rejects_duplicate_unique_id() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            store
                .create_entry(new_entry("http://192.0.2.5", Some("TL-001")))
                .unwrap();

            let error = store
                .create_entry(new_entry("http://192.0.2.6", Some("TL-001")))
                .unwrap_err();

            assert_eq!(
                error.downcast_ref::<EntryStoreError>(),
                Some(&EntryStoreError::DuplicateUniqueId("TL-001".to_string()))
            );
            assert_eq!(store.entries().len(), 1);
        }

        #[test]
        fn failed_write_leaves_store_unchanged() {
            let dir = TempDir::new().unwrap();
            let store =
                JsonEntryStore::open(dir.path().join("missing").join("entries.json")).unwrap();

            let result = store.create_entry(new_entry("http://192.0.2.5", None));

            assert!(result.is_err());
            assert!(store.entries().is_empty());
        }
    }

    mod remove {
        use super::*;

        #[test]
        fn removes_and_persists() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            let entry = store
                .create_entry(new_entry("http://192.0.2.5", None))
                .unwrap();

            let removed = store.remove_entry(&entry.entry_id).unwrap();

            assert_eq!(removed, Some(entry));
            assert!(open_store(&dir).entries().is_empty());
        }

        #[test]
        fn unknown_entry_is_none() {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            assert_eq!(store.remove_entry(&Uuid::new_v4()).unwrap(), None);
        }
    }
}
