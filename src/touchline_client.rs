//! Blocking client for the Roth Touchline controller's CGI interface.
//!
//! Every method performs network I/O and must only be called from the
//! blocking pool (`tokio::task::spawn_blocking`).

use crate::http_client::{device_client, handle_http_response};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::blocking::Client;
use std::{error::Error as _, io, time::Duration};
use thiserror::Error;

/// Failure talking to a controller
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The controller could not be reached at all
    #[error("connection to {host} refused")]
    ConnectionRefused { host: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unexpected value for {register}: {value:?}")]
    InvalidResponse { register: String, value: String },
}

/// Connectivity and identity check against a controller
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DeviceProbe {
    /// Number of thermostats paired with the controller at `host`
    fn device_count(&self, host: &str) -> Result<u32, ProbeError>;

    /// Identity of the controller as reported through thermostat `device`
    ///
    /// `None` when the controller answers with an empty identity.
    fn controller_id(&self, host: &str, device: u32) -> Result<Option<String>, ProbeError>;
}

/// Raw register values of a single thermostat
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThermostatRegisters {
    pub name: String,
    pub device_id: String,
    pub controller_id: String,
    /// Hundredths of a degree Celsius
    pub current_temperature: i32,
    /// Hundredths of a degree Celsius
    pub target_temperature: i32,
    pub operation_mode: u8,
    pub week_program: u8,
}

/// Thermostat reads and writes
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ThermostatClient {
    fn read_thermostat(&self, host: &str, device: u32) -> Result<ThermostatRegisters, ProbeError>;

    fn write_register(&self, host: &str, register: &str, value: &str) -> Result<(), ProbeError>;
}

/// Register names understood by the controller
pub mod registers {
    pub const NUMBER_OF_DEVICES: &str = "R0.numberOfPairedDevices";

    pub fn name(device: u32) -> String {
        format!("G{device}.name")
    }

    pub fn current_temperature(device: u32) -> String {
        format!("G{device}.RaumTemp")
    }

    pub fn target_temperature(device: u32) -> String {
        format!("G{device}.SollTemp")
    }

    pub fn operation_mode(device: u32) -> String {
        format!("G{device}.OPMode")
    }

    pub fn week_program(device: u32) -> String {
        format!("G{device}.WeekProg")
    }

    pub fn device_id(device: u32) -> String {
        format!("G{device}.kurzID")
    }

    pub fn controller_id(device: u32) -> String {
        format!("G{device}.ownerKennung")
    }
}

#[derive(Clone, Debug)]
pub struct TouchlineClient {
    timeout: Duration,
}

impl TouchlineClient {
    const READ_ENDPOINT: &str = "/cgi-bin/readVal.cgi";
    const WRITE_ENDPOINT: &str = "/cgi-bin/writeVal.cgi";

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_url(host: &str, endpoint: &str, query: &str) -> String {
        format!("{}{endpoint}?{query}", host.trim_end_matches('/'))
    }

    // A fresh client per call keeps reqwest's blocking runtime off the async executor.
    fn client(&self, url: &str) -> Result<Client, ProbeError> {
        device_client(self.timeout).map_err(|source| ProbeError::Request {
            url: url.to_string(),
            source,
        })
    }

    fn get(&self, host: &str, url: &str) -> Result<String, ProbeError> {
        info!("GET {url}");

        let res = self
            .client(url)?
            .get(url)
            .send()
            .map_err(|e| Self::classify(host, url, e))?;

        handle_http_response(res, &format!("GET {url}")).map_err(|source| ProbeError::Request {
            url: url.to_string(),
            source,
        })
    }

    fn read_register(&self, host: &str, register: &str) -> Result<String, ProbeError> {
        let url = Self::build_url(host, Self::READ_ENDPOINT, register);
        let value = self.get(host, &url)?.trim().to_string();
        debug!("{register} = {value:?}");
        Ok(value)
    }

    fn read_number<T: std::str::FromStr>(&self, host: &str, register: &str) -> Result<T, ProbeError> {
        let value = self.read_register(host, register)?;
        value
            .parse::<T>()
            .map_err(|_| ProbeError::InvalidResponse {
                register: register.to_string(),
                value,
            })
    }

    fn classify(host: &str, url: &str, e: reqwest::Error) -> ProbeError {
        if e.is_connect() || Self::is_connection_refused(&e) {
            return ProbeError::ConnectionRefused {
                host: host.to_string(),
            };
        }

        ProbeError::Request {
            url: url.to_string(),
            source: e.into(),
        }
    }

    fn is_connection_refused(e: &reqwest::Error) -> bool {
        let mut source = e.source();
        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::ConnectionRefused {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }
}

impl DeviceProbe for TouchlineClient {
    fn device_count(&self, host: &str) -> Result<u32, ProbeError> {
        self.read_number(host, registers::NUMBER_OF_DEVICES)
    }

    fn controller_id(&self, host: &str, device: u32) -> Result<Option<String>, ProbeError> {
        let id = self.read_register(host, &registers::controller_id(device))?;
        Ok(Some(id).filter(|id| !id.is_empty()))
    }
}

impl ThermostatClient for TouchlineClient {
    fn read_thermostat(&self, host: &str, device: u32) -> Result<ThermostatRegisters, ProbeError> {
        Ok(ThermostatRegisters {
            name: self.read_register(host, &registers::name(device))?,
            device_id: self.read_register(host, &registers::device_id(device))?,
            controller_id: self.read_register(host, &registers::controller_id(device))?,
            current_temperature: self.read_number(host, &registers::current_temperature(device))?,
            target_temperature: self.read_number(host, &registers::target_temperature(device))?,
            operation_mode: self.read_number(host, &registers::operation_mode(device))?,
            week_program: self.read_number(host, &registers::week_program(device))?,
        })
    }

    fn write_register(&self, host: &str, register: &str, value: &str) -> Result<(), ProbeError> {
        let url = Self::build_url(host, Self::WRITE_ENDPOINT, &format!("{register}={value}"));
        self.get(host, &url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod build_url {
        use super::*;

        #[test]
        fn appends_endpoint_and_query() {
            let url = TouchlineClient::build_url(
                "http://192.0.2.5",
                TouchlineClient::READ_ENDPOINT,
                registers::NUMBER_OF_DEVICES,
            );
            assert_eq!(
                url,
                "http://192.0.2.5/cgi-bin/readVal.cgi?R0.numberOfPairedDevices"
            );
        }

        #[test]
        fn strips_trailing_slash_of_host() {
            let url = TouchlineClient::build_url(
                "http://192.0.2.5/",
                TouchlineClient::WRITE_ENDPOINT,
                "G0.SollTemp=2100",
            );
            assert_eq!(url, "http://192.0.2.5/cgi-bin/writeVal.cgi?G0.SollTemp=2100");
        }
    }

    mod register_names {
        use super::super::registers;

        #[test]
        fn thermostat_registers_are_indexed_by_device() {
            assert_eq!(registers::name(3), "G3.name");
            assert_eq!(registers::current_temperature(0), "G0.RaumTemp");
            assert_eq!(registers::target_temperature(1), "G1.SollTemp");
            assert_eq!(registers::operation_mode(2), "G2.OPMode");
            assert_eq!(registers::week_program(2), "G2.WeekProg");
            assert_eq!(registers::device_id(0), "G0.kurzID");
            assert_eq!(registers::controller_id(0), "G0.ownerKennung");
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn connection_refused_names_the_host() {
            let e = ProbeError::ConnectionRefused {
                host: "http://192.0.2.5".to_string(),
            };
            assert_eq!(e.to_string(), "connection to http://192.0.2.5 refused");
        }

        #[test]
        fn refused_connection_is_classified() {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let host = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let client = TouchlineClient::new(Duration::from_secs(2));
            let result = client.device_count(&host);

            assert!(matches!(result, Err(ProbeError::ConnectionRefused { .. })));
        }
    }
}
