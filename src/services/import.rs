use crate::{
    entry_store::{CONF_HOST, EntryData, EntrySource, EntryStore},
    services::{flow_manager::FlowManager, setup_flow::FlowResult},
    touchline_client::DeviceProbe,
};
use anyhow::{Context, Result};
use ini::Ini;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::path::Path;

pub const IMPORT_SECTION: &str = "touchline";

/// Hosts declared in the static configuration file
///
/// `None` marks a section without a usable host.
pub fn declared_hosts(path: &Path) -> Result<Vec<Option<String>>> {
    let ini = Ini::load_from_file(path).context(format!("failed to load {path:?}"))?;

    Ok(ini
        .section_all(Some(IMPORT_SECTION))
        .map(|section| {
            section
                .get(CONF_HOST)
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(String::from)
        })
        .collect())
}

/// Service importing statically declared controllers once
pub struct ImportService;

impl ImportService {
    pub async fn import_static_config<Probe, Store>(
        manager: &FlowManager<Probe, Store>,
        store: &Store,
        path: &Path,
    ) -> Result<Vec<FlowResult>>
    where
        Probe: DeviceProbe + Send + Sync + 'static,
        Store: EntryStore,
    {
        if store
            .entries()
            .iter()
            .any(|entry| entry.source == EntrySource::Import)
        {
            debug!("static configuration already imported");
            return Ok(Vec::new());
        }

        if !path.exists() {
            debug!("no static configuration at {path:?}");
            return Ok(Vec::new());
        }

        let mut results = Vec::new();

        for host in declared_hosts(path)? {
            let Some(host) = host else {
                error!("No Roth Touchline detected");
                continue;
            };

            info!("importing {host}");

            let fields = EntryData::from_iter([(CONF_HOST.to_string(), Value::String(host.clone()))]);
            match manager.import(fields).await {
                Ok(result) => results.push(result),
                Err(e) => warn!("failed to import {host}: {e:#}"),
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entry_store::{ConfigEntry, MockEntryStore},
        logging::capture::CaptureLog,
        touchline_client::MockDeviceProbe,
    };
    use serde_json::json;
    use std::{fs, sync::Arc};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("touchline.ini");
        fs::write(&path, content).unwrap();
        path
    }

    fn stored(source: EntrySource) -> ConfigEntry {
        ConfigEntry {
            entry_id: Uuid::new_v4(),
            version: ConfigEntry::VERSION,
            title: "http://10.0.0.9".to_string(),
            unique_id: Some("TL-009".to_string()),
            source,
            data: EntryData::from_iter([(CONF_HOST.to_string(), json!("http://10.0.0.9"))]),
        }
    }

    mod hosts {
        use super::*;

        #[test]
        fn reads_every_section() {
            let dir = TempDir::new().unwrap();
            let path = write_config(
                &dir,
                "[touchline]\nhost = 10.0.0.9\n\n[other]\nhost = 10.0.0.1\n\n[touchline]\nname = attic\n",
            );

            assert_eq!(
                declared_hosts(&path).unwrap(),
                vec![Some("10.0.0.9".to_string()), None]
            );
        }

        #[test]
        fn blank_host_is_missing() {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, "[touchline]\nhost =\n");

            assert_eq!(declared_hosts(&path).unwrap(), vec![None]);
        }
    }

    mod import {
        use super::*;

        fn probe() -> Arc<MockDeviceProbe> {
            let mut probe = MockDeviceProbe::new();
            probe.expect_device_count().returning(|_| Ok(1));
            probe
                .expect_controller_id()
                .returning(|_, _| Ok(Some("TL-009".to_string())));
            Arc::new(probe)
        }

        #[tokio::test]
        async fn skipped_when_imported_entry_exists() {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, "[touchline]\nhost = 10.0.0.9\n");

            let mut store = MockEntryStore::new();
            store
                .expect_entries()
                .returning(|| vec![stored(EntrySource::Import)]);
            store.expect_create_entry().never();
            let store = Arc::new(store);
            let manager = FlowManager::new(probe(), Arc::clone(&store))
                .with_log_sink(CaptureLog::leaked());

            let results = ImportService::import_static_config(&manager, store.as_ref(), &path)
                .await
                .unwrap();

            assert!(results.is_empty());
        }

        #[tokio::test]
        async fn missing_file_is_skipped() {
            let dir = TempDir::new().unwrap();

            let mut store = MockEntryStore::new();
            store.expect_entries().returning(Vec::new);
            let store = Arc::new(store);
            let manager = FlowManager::new(probe(), Arc::clone(&store))
                .with_log_sink(CaptureLog::leaked());

            let results = ImportService::import_static_config(
                &manager,
                store.as_ref(),
                &dir.path().join("touchline.ini"),
            )
            .await
            .unwrap();

            assert!(results.is_empty());
        }

        #[tokio::test]
        async fn declared_host_creates_import_entry() {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, "[touchline]\nhost = 10.0.0.9\n\n[touchline]\n");

            let mut store = MockEntryStore::new();
            store
                .expect_entries()
                .returning(|| vec![stored(EntrySource::User)]);
            store.expect_has_match().returning(|_| false);
            store.expect_has_unique_id().returning(|_| false);
            store.expect_create_entry().times(1).returning(|new| {
                Ok(ConfigEntry {
                    entry_id: Uuid::new_v4(),
                    version: ConfigEntry::VERSION,
                    title: new.title,
                    unique_id: new.unique_id,
                    source: new.source,
                    data: new.data,
                })
            });
            let store = Arc::new(store);
            let manager = FlowManager::new(probe(), Arc::clone(&store))
                .with_log_sink(CaptureLog::leaked());

            let results = ImportService::import_static_config(&manager, store.as_ref(), &path)
                .await
                .unwrap();

            let [FlowResult::CreateEntry { result: entry, .. }] = results.as_slice() else {
                panic!("expected one entry");
            };
            assert_eq!(entry.source, EntrySource::Import);
            assert_eq!(entry.host(), Some("http://10.0.0.9"));
        }
    }
}
