//! Guided setup of Roth Touchline floor heating controllers.
//!
//! A setup flow asks for the controller's host, normalizes and validates it,
//! probes the controller and creates a persisted config entry for it. Loaded
//! entries expose their thermostats through the HTTP api.

pub mod api;
pub mod config;
pub mod entry_store;
pub mod http_client;
pub mod logging;
pub mod services;
pub mod touchline_client;
