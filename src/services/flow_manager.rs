use crate::{
    entry_store::{EntryData, EntryStore},
    logging::FlowLogger,
    services::{
        ServiceError,
        setup_flow::{FlowResult, SetupFlow},
    },
    touchline_client::DeviceProbe,
};
use anyhow::Result;
use log::{Log, debug};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

type SharedFlow<Probe, Store> = Arc<AsyncMutex<SetupFlow<Probe, Store>>>;

/// Keeps the active setup flows, one per user session
pub struct FlowManager<Probe, Store> {
    probe: Arc<Probe>,
    store: Arc<Store>,
    log_sink: &'static dyn Log,
    flows: Mutex<HashMap<Uuid, SharedFlow<Probe, Store>>>,
}

impl<Probe, Store> FlowManager<Probe, Store>
where
    Probe: DeviceProbe + Send + Sync + 'static,
    Store: EntryStore,
{
    pub fn new(probe: Arc<Probe>, store: Arc<Store>) -> Self {
        Self {
            probe,
            store,
            log_sink: log::logger(),
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Send flow logging to `sink` instead of the process logger
    pub fn with_log_sink(mut self, sink: &'static dyn Log) -> Self {
        self.log_sink = sink;
        self
    }

    fn new_flow(&self) -> SetupFlow<Probe, Store> {
        let flow_id = Uuid::new_v4();
        SetupFlow::new(
            flow_id,
            Arc::clone(&self.probe),
            Arc::clone(&self.store),
            FlowLogger::new(self.log_sink, flow_id),
        )
    }

    /// Start a flow and return its host form
    pub fn start_flow(&self) -> FlowResult {
        let mut flow = self.new_flow();
        let result = flow.start();

        debug!("started flow {}", flow.flow_id());

        self.flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flow.flow_id(), Arc::new(AsyncMutex::new(flow)));

        result
    }

    /// Submit user input to an active flow
    ///
    /// The flow is discarded once it created an entry or aborted.
    pub async fn progress_flow(&self, flow_id: Uuid, fields: EntryData) -> Result<FlowResult> {
        let flow = self
            .flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&flow_id)
            .cloned()
            .ok_or(ServiceError::UnknownFlow(flow_id))?;

        let mut flow = flow.lock().await;

        // finished by a concurrent submission while waiting for the lock
        if flow.state().is_finished() {
            return Err(ServiceError::UnknownFlow(flow_id).into());
        }

        let result = flow.submit(fields).await;

        if flow.state().is_finished() {
            debug!("flow {flow_id} finished");
            self.flows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&flow_id);
        }

        result
    }

    /// Abort an active flow without submitting anything
    pub fn abort_flow(&self, flow_id: Uuid) -> Result<()> {
        self.flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&flow_id)
            .ok_or(ServiceError::UnknownFlow(flow_id))?;

        debug!("aborted flow {flow_id}");
        Ok(())
    }

    /// Run a one-shot flow for statically declared configuration
    pub async fn import(&self, fields: EntryData) -> Result<FlowResult> {
        let mut flow = self.new_flow();
        debug!("import flow {}", flow.flow_id());
        flow.submit_from_import(fields).await
    }

    pub fn list_flows(&self) -> Vec<Uuid> {
        self.flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
