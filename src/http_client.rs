use crate::services::ServiceError;
use actix_web::HttpResponse;
use anyhow::{Context, Result, ensure};
use log::error;
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use std::time::Duration;

/// Create a blocking HTTP client for talking to a controller
///
/// Must be called off the async executor, i.e. from within a
/// `spawn_blocking` closure.
///
/// # Arguments
/// * `timeout` - Timeout applied to connecting and to every request
pub fn device_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .context("failed to create controller HTTP client")
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "GET readVal")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err` - If the status is not successful or reading the body fails
pub fn handle_http_response(res: Response, context_msg: &str) -> Result<String> {
    let status = res.status();
    let body = res.text().context("failed to read response body")?;

    ensure!(
        status.is_success(),
        "{context_msg} failed with status {status} and body: {body}"
    );

    Ok(body)
}

/// Serializes the wrapped value as the JSON body of a successful response
pub struct JsonBody<T>(pub T);

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().finish()
    }
}

impl<T: Serialize> ServiceResultResponse for JsonBody<T> {
    fn into_response(self) -> HttpResponse {
        match serde_json::to_string(&self.0) {
            Ok(json) => HttpResponse::Ok()
                .content_type("application/json")
                .body(json),
            Err(e) => {
                error!("failed to serialize response: {e:#}");
                HttpResponse::InternalServerError().body("failed to serialize response")
            }
        }
    }
}

/// Handle Result and convert data or error into a Response
///
/// Errors carrying a [`ServiceError`] are answered with its status code,
/// anything else with `500 Internal Server Error`.
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Context message describing the operation
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");

            match e.downcast_ref::<ServiceError>() {
                Some(service_error) => {
                    HttpResponse::build(service_error.status_code()).body(e.to_string())
                }
                None => HttpResponse::InternalServerError().body(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use uuid::Uuid;

    #[test]
    fn unit_result_is_ok() {
        let response = handle_service_result(Ok(()), "unit");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn json_body_sets_content_type() {
        let response = handle_service_result(Ok(JsonBody(vec![1, 2, 3])), "json");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn service_error_keeps_its_status() {
        let result: Result<()> = Err(ServiceError::UnknownFlow(Uuid::new_v4()).into());
        let response = handle_service_result(result, "progress_flow");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn service_error_survives_added_context() {
        let result: Result<()> =
            Err(anyhow::Error::from(ServiceError::NotReady("http://192.0.2.5".into())))
                .context("failed to reload entry");
        let response = handle_service_result(result, "reload_entry");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn other_errors_are_internal() {
        let result: Result<()> = Err(anyhow::anyhow!("boom"));
        let response = handle_service_result(result, "boom");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn device_client_builds_with_timeout() {
        // the blocking client refuses to start inside an async runtime, plain tests are fine
        assert!(device_client(Duration::from_secs(1)).is_ok());
    }
}
