//! Air conditioner capability adapter
//!
//! Typed getters and setters over the SmartThings capability/attribute
//! schema. Getters read through the [`StatusCache`]; setters send one
//! command and then invalidate the device's cache entry.
//!
//! Power is modelled per device as either the `switch` capability or the
//! `airConditionerMode` attribute (`"off"` meaning powered down), chosen by
//! [`PowerPolicy`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::StatusCache;
use super::client::SmartThingsClient;
use crate::error::Result;
use crate::models::{number_argument, Command, DeviceStatus};

pub const CAP_SWITCH: &str = "switch";
pub const CAP_AC_MODE: &str = "airConditionerMode";
pub const CAP_TEMPERATURE: &str = "temperatureMeasurement";
pub const CAP_COOLING_SETPOINT: &str = "thermostatCoolingSetpoint";
pub const CAP_OPTIONAL_MODE: &str = "custom.airConditionerOptionalMode";
pub const CAP_AUTO_CLEANING: &str = "custom.autoCleaningMode";

/// Defaults reported while an attribute is absent (typically just after a
/// mode change, before the backend settles).
pub const DEFAULT_MODE: &str = "off";
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_COOLING_SETPOINT: f64 = 18.0;

const WIND_FREE: &str = "windFree";

/// How power state is read and written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPolicy {
    /// Use `switch` once a device has reported that capability,
    /// otherwise the mode attribute.
    #[default]
    Auto,
    Switch,
    Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerControl {
    Switch,
    Mode,
}

impl PowerControl {
    fn detect(status: &DeviceStatus) -> Self {
        if status.has_capability(CAP_SWITCH) {
            PowerControl::Switch
        } else {
            PowerControl::Mode
        }
    }
}

/// Every getter at once, from a single status read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub power: bool,
    pub mode: String,
    pub current_temperature: f64,
    pub cooling_setpoint: f64,
    pub wind_free: bool,
    pub auto_clean: bool,
}

/// A single change to apply to a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Power(bool),
    Mode(String),
    Temperature(f64),
    WindFree(bool),
    AutoClean(bool),
}

pub struct AirConditioner {
    client: Arc<SmartThingsClient>,
    cache: StatusCache,
    power_policy: PowerPolicy,
    /// Mode sent to power on when power is modelled through the mode attribute.
    resume_mode: String,
    /// Devices seen reporting `switch`. Only a positive detection is kept, since
    /// capabilities can be missing from a single status document.
    switch_devices: Mutex<HashSet<String>>,
}

impl AirConditioner {
    pub fn new(client: Arc<SmartThingsClient>, cache: StatusCache) -> Self {
        Self {
            client,
            cache,
            power_policy: PowerPolicy::default(),
            resume_mode: "cool".to_string(),
            switch_devices: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_power_policy(mut self, policy: PowerPolicy, resume_mode: impl Into<String>) -> Self {
        self.power_policy = policy;
        self.resume_mode = resume_mode.into();
        self
    }

    pub fn client(&self) -> &Arc<SmartThingsClient> {
        &self.client
    }

    /// Status of the `main` component, through the cache.
    pub async fn status(&self, device_id: &str) -> Result<Arc<DeviceStatus>> {
        let client = Arc::clone(&self.client);
        let id = device_id.to_string();
        self.cache
            .get_or_fetch(device_id, move || async move { client.device_status(&id).await })
            .await
    }

    pub async fn get_power(&self, device_id: &str) -> Result<bool> {
        let status = self.status(device_id).await?;
        let control = self.power_control(device_id, &status);
        Ok(read_power(&status, control))
    }

    pub async fn get_mode(&self, device_id: &str) -> Result<String> {
        let status = self.status(device_id).await?;
        Ok(read_mode(&status).to_string())
    }

    pub async fn get_current_temperature(&self, device_id: &str) -> Result<f64> {
        let status = self.status(device_id).await?;
        Ok(status
            .f64_value(CAP_TEMPERATURE, "temperature")
            .unwrap_or(DEFAULT_TEMPERATURE))
    }

    pub async fn get_cooling_setpoint(&self, device_id: &str) -> Result<f64> {
        let status = self.status(device_id).await?;
        Ok(read_setpoint(&status))
    }

    pub async fn get_wind_free(&self, device_id: &str) -> Result<bool> {
        let status = self.status(device_id).await?;
        Ok(read_wind_free(&status))
    }

    pub async fn get_auto_clean(&self, device_id: &str) -> Result<bool> {
        let status = self.status(device_id).await?;
        Ok(read_auto_clean(&status))
    }

    pub async fn snapshot(&self, device_id: &str) -> Result<Snapshot> {
        let status = self.status(device_id).await?;
        let control = self.power_control(device_id, &status);
        Ok(Snapshot {
            power: read_power(&status, control),
            mode: read_mode(&status).to_string(),
            current_temperature: status
                .f64_value(CAP_TEMPERATURE, "temperature")
                .unwrap_or(DEFAULT_TEMPERATURE),
            cooling_setpoint: read_setpoint(&status),
            wind_free: read_wind_free(&status),
            auto_clean: read_auto_clean(&status),
        })
    }

    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<()> {
        let control = match self.power_policy {
            PowerPolicy::Switch => PowerControl::Switch,
            PowerPolicy::Mode => PowerControl::Mode,
            PowerPolicy::Auto => {
                let status = self.status(device_id).await?;
                self.power_control(device_id, &status)
            }
        };

        let command = match (control, on) {
            (PowerControl::Switch, true) => Command::main(CAP_SWITCH, "on", vec![]),
            (PowerControl::Switch, false) => Command::main(CAP_SWITCH, "off", vec![]),
            (PowerControl::Mode, true) => mode_command(&self.resume_mode),
            (PowerControl::Mode, false) => mode_command(DEFAULT_MODE),
        };
        self.send(device_id, command).await
    }

    /// `mode` is passed through as the vendor's native value
    /// (`cool`, `dry`, `heat`, `auto`, `off`, ...).
    pub async fn set_mode(&self, device_id: &str, mode: &str) -> Result<()> {
        self.send(device_id, mode_command(mode)).await
    }

    pub async fn set_temperature(&self, device_id: &str, celsius: f64) -> Result<()> {
        self.send(
            device_id,
            Command::main(
                CAP_COOLING_SETPOINT,
                "setCoolingSetpoint",
                vec![number_argument(celsius)],
            ),
        )
        .await
    }

    pub async fn set_wind_free(&self, device_id: &str, enable: bool) -> Result<()> {
        let value = if enable { WIND_FREE } else { "off" };
        self.send(
            device_id,
            Command::main(
                CAP_OPTIONAL_MODE,
                "setAcOptionalMode",
                vec![Value::from(value)],
            ),
        )
        .await
    }

    pub async fn set_auto_clean(&self, device_id: &str, enable: bool) -> Result<()> {
        let value = if enable { "on" } else { "off" };
        self.send(
            device_id,
            Command::main(
                CAP_AUTO_CLEANING,
                "setAutoCleaningMode",
                vec![Value::from(value)],
            ),
        )
        .await
    }

    pub async fn apply(&self, device_id: &str, setting: &Setting) -> Result<()> {
        match setting {
            Setting::Power(on) => self.set_power(device_id, *on).await,
            Setting::Mode(mode) => self.set_mode(device_id, mode).await,
            Setting::Temperature(celsius) => self.set_temperature(device_id, *celsius).await,
            Setting::WindFree(enable) => self.set_wind_free(device_id, *enable).await,
            Setting::AutoClean(enable) => self.set_auto_clean(device_id, *enable).await,
        }
    }

    async fn send(&self, device_id: &str, command: Command) -> Result<()> {
        self.client
            .send_commands(device_id, std::slice::from_ref(&command))
            .await?;
        self.cache.invalidate(device_id);
        Ok(())
    }

    fn power_control(&self, device_id: &str, status: &DeviceStatus) -> PowerControl {
        match self.power_policy {
            PowerPolicy::Switch => PowerControl::Switch,
            PowerPolicy::Mode => PowerControl::Mode,
            PowerPolicy::Auto => {
                let mut switch_devices =
                    self.switch_devices.lock().unwrap_or_else(|e| e.into_inner());
                if switch_devices.contains(device_id) {
                    return PowerControl::Switch;
                }
                let control = PowerControl::detect(status);
                if control == PowerControl::Switch {
                    tracing::debug!("Power for {} modelled via switch", device_id);
                    switch_devices.insert(device_id.to_string());
                }
                control
            }
        }
    }
}

fn mode_command(mode: &str) -> Command {
    Command::main(CAP_AC_MODE, "setAirConditionerMode", vec![Value::from(mode)])
}

fn read_mode(status: &DeviceStatus) -> &str {
    status
        .str_value(CAP_AC_MODE, "airConditionerMode")
        .unwrap_or(DEFAULT_MODE)
}

fn read_power(status: &DeviceStatus, control: PowerControl) -> bool {
    match control {
        PowerControl::Switch => status.str_value(CAP_SWITCH, "switch") == Some("on"),
        PowerControl::Mode => read_mode(status) != DEFAULT_MODE,
    }
}

fn read_setpoint(status: &DeviceStatus) -> f64 {
    status
        .f64_value(CAP_COOLING_SETPOINT, "coolingSetpoint")
        .unwrap_or(DEFAULT_COOLING_SETPOINT)
}

fn read_wind_free(status: &DeviceStatus) -> bool {
    status.str_value(CAP_OPTIONAL_MODE, "acOptionalMode") == Some(WIND_FREE)
}

fn read_auto_clean(status: &DeviceStatus) -> bool {
    status.str_value(CAP_AUTO_CLEANING, "autoCleaningMode") == Some("on")
}
