use crate::{
    entry_store::{EntryData, EntryStore},
    http_client::{JsonBody, handle_service_result},
    services::{
        ServiceError,
        climate::{ClimateService, SetPresetRequest, SetTemperatureRequest},
        controller::{ControllerRegistry, LoadedController},
        flow_manager::FlowManager,
        setup_flow::FlowResult,
    },
    touchline_client::{DeviceProbe, ThermostatClient},
};
use actix_web::{HttpResponse, Responder, web};
use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

pub struct Api<Device, Store> {
    pub device: Arc<Device>,
    pub store: Arc<Store>,
    pub flows: FlowManager<Device, Store>,
    pub controllers: ControllerRegistry<Device>,
}

impl<Device, Store> Api<Device, Store>
where
    Device: DeviceProbe + ThermostatClient + Send + Sync + 'static,
    Store: EntryStore + Send + Sync + 'static,
{
    pub fn new(device: Arc<Device>, store: Arc<Store>) -> Self {
        Api {
            flows: FlowManager::new(Arc::clone(&device), Arc::clone(&store)),
            controllers: ControllerRegistry::new(Arc::clone(&device)),
            device,
            store,
        }
    }

    /// Register all routes of this api
    pub fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/version", web::get().to(Self::version))
            .route("/flows", web::post().to(Self::start_flow))
            .route("/flows", web::get().to(Self::list_flows))
            .route("/flows/{flow_id}", web::post().to(Self::progress_flow))
            .route("/flows/{flow_id}", web::delete().to(Self::abort_flow))
            .route("/entries", web::get().to(Self::entries))
            .route("/entries/{entry_id}", web::delete().to(Self::remove_entry))
            .route("/entries/{entry_id}/reload", web::post().to(Self::reload_entry))
            .route(
                "/entries/{entry_id}/thermostats",
                web::get().to(Self::thermostats),
            )
            .route(
                "/entries/{entry_id}/thermostats/{device}/preset",
                web::post().to(Self::set_preset_mode),
            )
            .route(
                "/entries/{entry_id}/thermostats/{device}/temperature",
                web::post().to(Self::set_temperature),
            );
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    pub async fn start_flow(api: web::Data<Self>) -> impl Responder {
        debug!("start_flow() called");
        handle_service_result(Ok(JsonBody(api.flows.start_flow())), "start_flow")
    }

    pub async fn list_flows(api: web::Data<Self>) -> impl Responder {
        debug!("list_flows() called");
        handle_service_result(Ok(JsonBody(api.flows.list_flows())), "list_flows")
    }

    pub async fn progress_flow(
        path: web::Path<Uuid>,
        body: web::Json<EntryData>,
        api: web::Data<Self>,
    ) -> impl Responder {
        let flow_id = path.into_inner();
        debug!("progress_flow() called: {flow_id}");

        let result = api.flows.progress_flow(flow_id, body.into_inner()).await;

        if let Ok(FlowResult::CreateEntry { result: entry, .. }) = &result {
            if let Err(e) = api.controllers.setup_entry(entry).await {
                warn!("created entry {} is not set up: {e:#}", entry.entry_id);
            }
        }

        handle_service_result(result.map(JsonBody), "progress_flow")
    }

    pub async fn abort_flow(path: web::Path<Uuid>, api: web::Data<Self>) -> impl Responder {
        let flow_id = path.into_inner();
        debug!("abort_flow() called: {flow_id}");
        handle_service_result(api.flows.abort_flow(flow_id), "abort_flow")
    }

    pub async fn entries(api: web::Data<Self>) -> impl Responder {
        debug!("entries() called");
        handle_service_result(Ok(JsonBody(api.store.entries())), "entries")
    }

    pub async fn remove_entry(path: web::Path<Uuid>, api: web::Data<Self>) -> impl Responder {
        let entry_id = path.into_inner();
        debug!("remove_entry() called: {entry_id}");

        let result = api
            .store
            .remove_entry(&entry_id)
            .and_then(|removed| {
                removed.ok_or_else(|| anyhow::Error::from(ServiceError::UnknownEntry(entry_id)))
            })
            .map(|removed| {
                api.controllers.unload_entry(&entry_id);
                JsonBody(removed)
            });

        handle_service_result(result, "remove_entry")
    }

    pub async fn reload_entry(path: web::Path<Uuid>, api: web::Data<Self>) -> impl Responder {
        let entry_id = path.into_inner();
        debug!("reload_entry() called: {entry_id}");

        let result = match api.store.entry(&entry_id) {
            Some(entry) => api.controllers.reload_entry(&entry).await.map(JsonBody),
            None => Err(ServiceError::UnknownEntry(entry_id).into()),
        };

        handle_service_result(result, "reload_entry")
    }

    pub async fn thermostats(path: web::Path<Uuid>, api: web::Data<Self>) -> impl Responder {
        let entry_id = path.into_inner();
        debug!("thermostats() called: {entry_id}");

        let result = async {
            let controller = api.loaded_controller(&entry_id)?;
            ClimateService::thermostats(&api.device, &controller.host, controller.device_count)
                .await
                .map(JsonBody)
        }
        .await;

        handle_service_result(result, "thermostats")
    }

    pub async fn set_preset_mode(
        path: web::Path<(Uuid, u32)>,
        body: web::Json<SetPresetRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        let (entry_id, device) = path.into_inner();
        debug!("set_preset_mode() called: {entry_id}/{device} {body:?}");

        let result = async {
            let controller = api.loaded_device(&entry_id, device)?;
            ClimateService::set_preset_mode(&api.device, &controller.host, device, &body).await
        }
        .await;

        handle_service_result(result, "set_preset_mode")
    }

    pub async fn set_temperature(
        path: web::Path<(Uuid, u32)>,
        body: web::Json<SetTemperatureRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        let (entry_id, device) = path.into_inner();
        debug!("set_temperature() called: {entry_id}/{device} {body:?}");

        let result = async {
            let controller = api.loaded_device(&entry_id, device)?;
            ClimateService::set_temperature(&api.device, &controller.host, device, &body).await
        }
        .await;

        handle_service_result(result, "set_temperature")
    }

    fn loaded_controller(&self, entry_id: &Uuid) -> Result<LoadedController> {
        if let Some(controller) = self.controllers.loaded(entry_id) {
            return Ok(controller);
        }

        match self.store.entry(entry_id) {
            Some(entry) => Err(ServiceError::NotReady(entry.title).into()),
            None => Err(ServiceError::UnknownEntry(*entry_id).into()),
        }
    }

    fn loaded_device(&self, entry_id: &Uuid, device: u32) -> Result<LoadedController> {
        let controller = self.loaded_controller(entry_id)?;

        if device >= controller.device_count {
            return Err(ServiceError::InvalidRequest(format!(
                "{} has no thermostat {device}",
                controller.host
            ))
            .into());
        }

        Ok(controller)
    }
}
