use actix_cors::Cors;
use actix_server::ServerHandle;
use actix_web::{
    App, HttpServer,
    web::{self, Data},
};
use anyhow::{Context, Result};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use touchline_setup::{
    api::Api,
    config::AppConfig,
    entry_store::{EntryStore, JsonEntryStore},
    logging,
    services::{import::ImportService, setup_flow::FlowResult},
    touchline_client::TouchlineClient,
};

type SetupApi = Api<TouchlineClient, JsonEntryStore>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::get();

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let store = Arc::new(
        JsonEntryStore::open(&config.paths.entries_file).context("failed to open entry store")?,
    );
    let client = Arc::new(TouchlineClient::new(config.device.request_timeout));
    let api = Data::new(SetupApi::new(client, Arc::clone(&store)));

    api.controllers.setup_all(&store.entries()).await;

    match ImportService::import_static_config(
        &api.flows,
        store.as_ref(),
        &config.paths.import_config_file,
    )
    .await
    {
        Ok(results) => {
            for entry in results.iter().filter_map(|result| match result {
                FlowResult::CreateEntry { result, .. } => Some(result),
                _ => None,
            }) {
                if let Err(e) = api.controllers.setup_entry(entry).await {
                    error!("failed to set up imported entry {}: {e:#}", entry.entry_id);
                }
            }
        }
        Err(e) => error!("failed to import static configuration: {e:#}"),
    }

    let (server_handle, server_task) = run_server(api)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn run_server(
    api: Data<SetupApi>,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let ui = &AppConfig::get().ui;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allowed_methods(vec!["GET", "POST", "DELETE"])
                    .max_age(3600),
            )
            .app_data(api.clone())
            .app_data(web::JsonConfig::default().limit(4096))
            .configure(SetupApi::routes)
    })
    .bind((ui.bind_address.as_str(), ui.port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    info!("listening on {}:{}", ui.bind_address, ui.port);

    Ok((server.handle(), tokio::spawn(server)))
}
