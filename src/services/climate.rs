use crate::{
    services::{ServiceError, run_blocking},
    touchline_client::{ThermostatClient, ThermostatRegisters, registers},
};
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_valid::Validate;
use std::sync::Arc;

// ============================================================================
// Types
// ============================================================================

/// Operation mode register values
#[derive(Clone, Copy, Debug, Deserialize_repr, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum OperationMode {
    Normal = 0,
    Night = 1,
    Holiday = 2,
}

impl TryFrom<u8> for OperationMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Night),
            2 => Ok(Self::Holiday),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum PresetMode {
    Normal,
    Night,
    Holiday,
    #[serde(rename = "Pro 1")]
    Pro1,
    #[serde(rename = "Pro 2")]
    Pro2,
    #[serde(rename = "Pro 3")]
    Pro3,
}

impl PresetMode {
    pub const ALL: [PresetMode; 6] = [
        PresetMode::Normal,
        PresetMode::Night,
        PresetMode::Holiday,
        PresetMode::Pro1,
        PresetMode::Pro2,
        PresetMode::Pro3,
    ];

    /// Operation mode and week program a preset is written as
    pub fn registers(self) -> (OperationMode, u8) {
        match self {
            PresetMode::Normal => (OperationMode::Normal, 0),
            PresetMode::Night => (OperationMode::Night, 0),
            PresetMode::Holiday => (OperationMode::Holiday, 0),
            PresetMode::Pro1 => (OperationMode::Normal, 1),
            PresetMode::Pro2 => (OperationMode::Normal, 2),
            PresetMode::Pro3 => (OperationMode::Normal, 3),
        }
    }

    pub fn from_registers(operation_mode: u8, week_program: u8) -> Option<Self> {
        let mode = OperationMode::try_from(operation_mode).ok()?;
        Self::ALL
            .into_iter()
            .find(|preset| preset.registers() == (mode, week_program))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    #[default]
    Heat,
}

/// Snapshot of a single thermostat
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thermostat {
    pub device: u32,
    pub name: String,
    pub device_id: String,
    pub controller_id: String,
    pub unique_id: String,
    pub current_temperature: f64,
    pub target_temperature: f64,
    pub hvac_mode: HvacMode,
    pub preset_mode: Option<PresetMode>,
}

impl Thermostat {
    fn from_registers(device: u32, regs: ThermostatRegisters) -> Self {
        Self {
            device,
            unique_id: format!("{}{}", regs.controller_id, regs.device_id),
            current_temperature: f64::from(regs.current_temperature) / 100.0,
            target_temperature: f64::from(regs.target_temperature) / 100.0,
            hvac_mode: HvacMode::Heat,
            preset_mode: PresetMode::from_registers(regs.operation_mode, regs.week_program),
            name: regs.name,
            device_id: regs.device_id,
            controller_id: regs.controller_id,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPresetRequest {
    pub preset_mode: PresetMode,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetTemperatureRequest {
    #[validate(minimum = 5.0)]
    #[validate(maximum = 30.0)]
    pub temperature: f64,
}

// ============================================================================
// Service
// ============================================================================

/// Service for reading and controlling the thermostats of a controller
pub struct ClimateService;

impl ClimateService {
    /// Read all `count` thermostats of the controller at `host`
    pub async fn thermostats<T>(client: &Arc<T>, host: &str, count: u32) -> Result<Vec<Thermostat>>
    where
        T: ThermostatClient + Send + Sync + 'static,
    {
        let client = Arc::clone(client);
        let host = host.to_string();

        run_blocking(move || -> Result<Vec<Thermostat>> {
            (0..count)
                .map(|device| {
                    client
                        .read_thermostat(&host, device)
                        .map(|regs| Thermostat::from_registers(device, regs))
                        .context(format!("failed to read thermostat {device} of {host}"))
                })
                .collect()
        })
        .await?
    }

    /// Write operation mode, then week program
    pub async fn set_preset_mode<T>(
        client: &Arc<T>,
        host: &str,
        device: u32,
        request: &SetPresetRequest,
    ) -> Result<()>
    where
        T: ThermostatClient + Send + Sync + 'static,
    {
        info!("set preset of {host} thermostat {device}: {request:?}");

        let (mode, program) = request.preset_mode.registers();
        let client = Arc::clone(client);
        let host = host.to_string();

        run_blocking(move || -> Result<()> {
            client
                .write_register(&host, &registers::operation_mode(device), &(mode as u8).to_string())
                .context("failed to write operation mode")?;
            client
                .write_register(&host, &registers::week_program(device), &program.to_string())
                .context("failed to write week program")
        })
        .await?
    }

    pub async fn set_temperature<T>(
        client: &Arc<T>,
        host: &str,
        device: u32,
        request: &SetTemperatureRequest,
    ) -> Result<()>
    where
        T: ThermostatClient + Send + Sync + 'static,
    {
        info!("set target temperature of {host} thermostat {device}: {request:?}");

        request
            .validate()
            .map_err(|e| ServiceError::InvalidRequest(format!("temperature validation failed: {e}")))?;

        let hundredths = (request.temperature * 100.0).round() as i32;
        let client = Arc::clone(client);
        let host = host.to_string();

        run_blocking(move || {
            client
                .write_register(&host, &registers::target_temperature(device), &hundredths.to_string())
                .context("failed to write target temperature")
        })
        .await?
    }
}
