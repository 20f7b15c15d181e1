use crate::{
    entry_store::ConfigEntry,
    services::{ServiceError, run_blocking},
    touchline_client::DeviceProbe,
};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;

/// A configured controller that answered with at least one thermostat
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedController {
    pub entry_id: Uuid,
    pub host: String,
    pub device_count: u32,
}

/// Tracks which config entries have a reachable controller
pub struct ControllerRegistry<Probe> {
    probe: Arc<Probe>,
    loaded: Mutex<HashMap<Uuid, LoadedController>>,
}

impl<Probe> ControllerRegistry<Probe>
where
    Probe: DeviceProbe + Send + Sync + 'static,
{
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, LoadedController>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn setup_entry(&self, entry: &ConfigEntry) -> Result<LoadedController> {
        let host = entry
            .host()
            .ok_or_else(|| ServiceError::InvalidRequest(format!("entry {} has no host", entry.entry_id)))?
            .to_string();

        let probe = Arc::clone(&self.probe);
        let count_host = host.clone();
        let device_count = run_blocking(move || probe.device_count(&count_host))
            .await?
            .context(format!("failed to query devices of {host}"))?;

        if device_count == 0 {
            return Err(ServiceError::NotReady(host).into());
        }

        let controller = LoadedController {
            entry_id: entry.entry_id,
            host,
            device_count,
        };

        info!(
            "set up entry {} with {} thermostat(s) at {}",
            controller.entry_id, controller.device_count, controller.host
        );

        self.lock().insert(entry.entry_id, controller.clone());

        Ok(controller)
    }

    pub fn unload_entry(&self, entry_id: &Uuid) -> Option<LoadedController> {
        let unloaded = self.lock().remove(entry_id);
        if unloaded.is_some() {
            info!("unloaded entry {entry_id}");
        }
        unloaded
    }

    pub async fn reload_entry(&self, entry: &ConfigEntry) -> Result<LoadedController> {
        self.unload_entry(&entry.entry_id);
        self.setup_entry(entry).await
    }

    pub fn loaded(&self, entry_id: &Uuid) -> Option<LoadedController> {
        self.lock().get(entry_id).cloned()
    }

    /// Set up every stored entry, leaving failed ones unloaded
    pub async fn setup_all(&self, entries: &[ConfigEntry]) {
        for entry in entries {
            if let Err(e) = self.setup_entry(entry).await {
                warn!("failed to set up entry {} ({}): {e:#}", entry.entry_id, entry.title);
            }
        }
    }
}
