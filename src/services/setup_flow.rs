//! Setup flow for a single Roth Touchline controller
//!
//! A flow walks the user from a host address to a persisted config entry:
//! normalize and validate the host, reject hosts and controllers that are
//! already configured, probe the controller on the blocking pool and finally
//! create the entry.

use crate::{
    entry_store::{
        CONF_HOST, ConfigEntry, EntryData, EntrySource, EntryStore, EntryStoreError, NewEntry,
    },
    logging::FlowLogger,
    services::run_blocking,
    touchline_client::{DeviceProbe, ProbeError},
};
use anyhow::{Result, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_valid::Validate;
use std::{collections::HashMap, sync::Arc, sync::OnceLock};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const STEP_USER: &str = "user";
pub const ERROR_BASE: &str = "base";

/// Reasons a submission is rejected or the flow is aborted
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("invalid host: {0:?}")]
    InvalidInput(String),

    #[error("cannot connect to {0}")]
    CannotConnect(String),

    #[error("host {0} already configured")]
    DuplicateHost(String),

    #[error("controller {0} already configured")]
    DuplicateIdentity(String),
}

impl FlowError {
    /// Error code shown to the user, or abort reason for duplicates
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidInput(_) => "invalid_input",
            FlowError::CannotConnect(_) => "cannot_connect",
            FlowError::DuplicateHost(_) | FlowError::DuplicateIdentity(_) => "already_configured",
        }
    }

    /// Duplicates end the flow, everything else re-shows the form
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            FlowError::DuplicateHost(_) | FlowError::DuplicateIdentity(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    AwaitingInput,
    Validating,
    Probing,
    Done,
    Aborted,
}

impl FlowState {
    pub fn is_finished(self) -> bool {
        matches!(self, FlowState::Done | FlowState::Aborted)
    }
}

/// Form field schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// What the caller should show next
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        flow_id: Uuid,
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        flow_id: Uuid,
        result: ConfigEntry,
    },
    Abort {
        flow_id: Uuid,
        reason: String,
    },
}

impl FlowResult {
    pub fn flow_id(&self) -> Uuid {
        match self {
            FlowResult::Form { flow_id, .. }
            | FlowResult::CreateEntry { flow_id, .. }
            | FlowResult::Abort { flow_id, .. } => *flow_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    CannotConnect,
}

/// Result of checking a controller before an entry is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    pub device_identity: Option<String>,
}

impl ProbeResult {
    fn success(device_identity: String) -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            device_identity: Some(device_identity),
        }
    }

    fn cannot_connect() -> Self {
        Self {
            outcome: ProbeOutcome::CannotConnect,
            device_identity: None,
        }
    }

    /// Identity of the controller if the probe succeeded
    pub fn identity(self) -> Option<String> {
        match self.outcome {
            ProbeOutcome::Success => self.device_identity,
            ProbeOutcome::CannotConnect => None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct SetupRequest {
    #[validate(min_length = 1)]
    host: String,
    #[serde(flatten)]
    extra: EntryData,
}

impl SetupRequest {
    fn from_fields(fields: &EntryData) -> Result<Self, FlowError> {
        let submitted = || {
            fields
                .get(CONF_HOST)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let request: Self = serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|_| FlowError::InvalidInput(submitted()))?;

        request
            .validate()
            .map_err(|_| FlowError::InvalidInput(submitted()))?;

        Ok(request)
    }
}

fn scheme_pattern() -> &'static Regex {
    static SCHEME_PATTERN: OnceLock<Regex> = OnceLock::new();
    SCHEME_PATTERN
        .get_or_init(|| Regex::new(r"^(?i:https?://)+").expect("invalid scheme pattern"))
}

/// Replace any leading `http://` / `https://` (any case) by a single `http://`
pub fn normalize_host(host: &str) -> String {
    format!("http://{}", scheme_pattern().replace(host, ""))
}

/// Check that a normalized host is a well-formed URL naming a host
pub fn validate_host(host: &str) -> Result<Url, FlowError> {
    let invalid = || FlowError::InvalidInput(host.to_string());

    if host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let url = Url::parse(host).map_err(|_| invalid())?;

    match url.host_str() {
        Some(name) if !name.is_empty() => Ok(url),
        _ => Err(invalid()),
    }
}

/// Count devices and, if there are any, fetch the controller identity
///
/// A refused connection is an expected outcome and reported as
/// [`ProbeOutcome::CannotConnect`]; every other failure is returned.
pub fn probe_controller<P>(probe: &P, host: &str, log: &FlowLogger) -> Result<ProbeResult, ProbeError>
where
    P: DeviceProbe + ?Sized,
{
    let fetch = || -> Result<ProbeResult, ProbeError> {
        let number_of_devices = probe.device_count(host)?;
        log.debug(format_args!("Number of devices found: {number_of_devices}"));

        if number_of_devices == 0 {
            return Ok(ProbeResult::cannot_connect());
        }

        Ok(match probe.controller_id(host, 0)? {
            Some(id) => ProbeResult::success(id),
            None => ProbeResult::cannot_connect(),
        })
    };

    match fetch() {
        Err(ProbeError::ConnectionRefused { .. }) => {
            log.debug(format_args!(
                "Failed to connect to device {host}. Check the IP address \
                 as well as whether the device is connected to power and network"
            ));
            Ok(ProbeResult::cannot_connect())
        }
        result => result,
    }
}

/// One setup session producing at most one config entry
pub struct SetupFlow<Probe, Store> {
    flow_id: Uuid,
    probe: Arc<Probe>,
    store: Arc<Store>,
    log: FlowLogger,
    state: FlowState,
}

impl<Probe, Store> SetupFlow<Probe, Store>
where
    Probe: DeviceProbe + Send + Sync + 'static,
    Store: EntryStore,
{
    pub fn new(flow_id: Uuid, probe: Arc<Probe>, store: Arc<Store>, log: FlowLogger) -> Self {
        Self {
            flow_id,
            probe,
            store,
            log,
            state: FlowState::AwaitingInput,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Show the empty host form
    pub fn start(&mut self) -> FlowResult {
        self.state = FlowState::AwaitingInput;
        self.show_form(None, HashMap::new())
    }

    /// Handle a host submitted through the form
    pub async fn submit(&mut self, fields: EntryData) -> Result<FlowResult> {
        self.handle(fields, EntrySource::User).await
    }

    /// Handle a host declared in static configuration
    pub async fn submit_from_import(&mut self, fields: EntryData) -> Result<FlowResult> {
        self.handle(fields, EntrySource::Import).await
    }

    async fn handle(&mut self, fields: EntryData, source: EntrySource) -> Result<FlowResult> {
        ensure!(
            !self.state.is_finished(),
            "flow {} already finished",
            self.flow_id
        );

        self.state = FlowState::Validating;
        let submitted_host = fields.get(CONF_HOST).cloned();

        let error = match self.run(fields, source).await {
            Ok(entry) => {
                self.state = FlowState::Done;
                return Ok(FlowResult::CreateEntry {
                    flow_id: self.flow_id,
                    result: entry,
                });
            }
            Err(e) => match e.downcast::<FlowError>() {
                Ok(error) => error,
                Err(e) => {
                    self.state = FlowState::AwaitingInput;
                    return Err(e);
                }
            },
        };

        if error.is_abort() {
            self.log.info(format_args!("aborting: {error}"));
            self.state = FlowState::Aborted;
            return Ok(FlowResult::Abort {
                flow_id: self.flow_id,
                reason: error.code().to_string(),
            });
        }

        self.log.info(format_args!("rejected submission: {error}"));
        self.state = FlowState::AwaitingInput;

        Ok(self.show_form(
            submitted_host,
            HashMap::from([(ERROR_BASE.to_string(), error.code().to_string())]),
        ))
    }

    async fn run(&mut self, fields: EntryData, source: EntrySource) -> Result<ConfigEntry> {
        let request = SetupRequest::from_fields(&fields)?;

        self.abort_entries_match(&request.host)?;

        let host = normalize_host(&request.host);
        validate_host(&host)?;

        self.abort_entries_match(&host)?;

        self.state = FlowState::Probing;
        let result = {
            let probe = Arc::clone(&self.probe);
            let log = self.log.clone();
            let host = host.clone();
            run_blocking(move || probe_controller(probe.as_ref(), &host, &log)).await??
        };

        let Some(unique_id) = result.identity() else {
            return Err(FlowError::CannotConnect(host).into());
        };

        self.abort_if_unique_id_configured(&unique_id)?;

        let mut data = request.extra;
        data.insert(CONF_HOST.to_string(), Value::String(host.clone()));

        self.log.debug(format_args!("Host: {host}"));

        self.store
            .create_entry(NewEntry {
                title: host,
                unique_id: Some(unique_id),
                source,
                data,
            })
            .map_err(|e| match e.downcast::<EntryStoreError>() {
                // another flow committed the same controller since the identity check
                Ok(EntryStoreError::DuplicateUniqueId(unique_id)) => {
                    FlowError::DuplicateIdentity(unique_id).into()
                }
                Err(e) => e,
            })
    }

    fn abort_entries_match(&self, host: &str) -> Result<(), FlowError> {
        let criteria = EntryData::from_iter([(CONF_HOST.to_string(), json!(host))]);

        if self.store.has_match(&criteria) {
            return Err(FlowError::DuplicateHost(host.to_string()));
        }

        Ok(())
    }

    fn abort_if_unique_id_configured(&self, unique_id: &str) -> Result<(), FlowError> {
        if self.store.has_unique_id(unique_id) {
            return Err(FlowError::DuplicateIdentity(unique_id.to_string()));
        }

        Ok(())
    }

    fn show_form(&self, host: Option<Value>, errors: HashMap<String, String>) -> FlowResult {
        FlowResult::Form {
            flow_id: self.flow_id,
            step_id: STEP_USER.to_string(),
            data_schema: vec![FormField {
                name: CONF_HOST.to_string(),
                field_type: "string".to_string(),
                required: true,
                default: host,
            }],
            errors,
        }
    }
}
