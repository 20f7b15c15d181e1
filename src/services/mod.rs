//! Business logic services
//!
//! This module contains business logic separated from HTTP concerns.

pub mod climate;
pub mod controller;
pub mod flow_manager;
pub mod import;
pub mod setup_flow;

use actix_web::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Service failures the HTTP layer answers with a dedicated status code
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown flow: {0}")]
    UnknownFlow(Uuid),

    #[error("unknown entry: {0}")]
    UnknownEntry(Uuid),

    #[error("controller at {0} is not ready")]
    NotReady(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UnknownFlow(_) | ServiceError::UnknownEntry(_) => StatusCode::NOT_FOUND,
            ServiceError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Run blocking controller I/O on the blocking pool and await its result
pub(crate) async fn run_blocking<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("blocking task failed: {e}"))
}
