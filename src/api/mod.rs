//! API client module for SmartThings air conditioners

pub mod aircon;
pub mod cache;
pub mod client;

use std::sync::Arc;

use anyhow::{bail, Context, Result};

pub use aircon::{AirConditioner, PowerPolicy, Setting, Snapshot};
pub use cache::StatusCache;
pub use client::SmartThingsClient;

use crate::config::Config;
use crate::models::{normalize_label, Device};

/// Configured labels paired with the vendor device carrying that label
/// (compared trimmed and NFC-normalized).
/// Labels with no match are logged and skipped.
pub fn find_configured_devices<'a>(devices: &'a [Device], labels: &[String]) -> Vec<&'a Device> {
    labels
        .iter()
        .filter_map(|label| {
            let found = devices.iter().find(|d| d.matches_label(label));
            if found.is_none() {
                tracing::warn!(
                    "No SmartThings device labelled '{}'",
                    normalize_label(label)
                );
            }
            found
        })
        .collect()
}

/// Look a device up by id, falling back to label.
pub fn resolve_device<'a>(devices: &'a [Device], key: &str) -> Option<&'a Device> {
    devices
        .iter()
        .find(|d| d.device_id == key)
        .or_else(|| devices.iter().find(|d| d.matches_label(key)))
}

/// Build the client stack for the configured account and load its tokens.
pub async fn connect(config: &Config) -> Result<AirConditioner> {
    let authority = crate::auth::authority(config)?;
    authority.load_tokens().await?;

    let client = SmartThingsClient::new(
        config.api_base.clone(),
        Arc::new(authority),
        config.request_timeout(),
        config.retry_policy(),
    )?;

    Ok(
        AirConditioner::new(
            Arc::new(client),
            StatusCache::new(config.cache_ttl(), config.stale_on_error),
        )
        .with_power_policy(config.power, config.resume_mode.clone()),
    )
}

async fn device_id_for(ac: &AirConditioner, key: &str) -> Result<String> {
    let devices = ac.client().list_devices().await?;
    match resolve_device(&devices, key) {
        Some(device) => Ok(device.device_id.clone()),
        None => bail!("No SmartThings device with id or label '{}'", key),
    }
}

/// List devices, marking those named in the config
pub async fn list_devices(config: &Config) -> Result<()> {
    let ac = connect(config).await?;
    let devices = ac.client().list_devices().await?;
    if devices.is_empty() {
        println!("No SmartThings devices found. Check the token scopes.");
        return Ok(());
    }

    let configured = find_configured_devices(&devices, &config.device_labels());

    println!();
    for device in &devices {
        let marker = if configured.iter().any(|d| d.device_id == device.device_id) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<38} {:<24} {}",
            marker,
            device.device_id,
            device.display_name(),
            device.device_type_name.as_deref().unwrap_or("")
        );
    }
    println!();
    println!(
        "{} device(s), {} configured",
        devices.len(),
        configured.len()
    );
    Ok(())
}

/// Print the current state of one unit
pub async fn show(config: &Config, device: &str) -> Result<()> {
    let ac = connect(config).await?;
    let device_id = device_id_for(&ac, device).await?;
    let snapshot = ac
        .snapshot(&device_id)
        .await
        .with_context(|| format!("Failed to read status of {}", device))?;
    // Served from the cache filled by the snapshot.
    let status = ac.status(&device_id).await?;
    let unit = |capability: &str, attribute: &str| {
        status
            .unit(capability, attribute)
            .map(|u| format!(" °{}", u))
            .unwrap_or_default()
    };

    println!();
    println!("Power:        {}", on_off(snapshot.power));
    println!("Mode:         {}", snapshot.mode);
    println!(
        "Temperature:  {}{}",
        snapshot.current_temperature,
        unit(aircon::CAP_TEMPERATURE, "temperature")
    );
    println!(
        "Setpoint:     {}{}",
        snapshot.cooling_setpoint,
        unit(aircon::CAP_COOLING_SETPOINT, "coolingSetpoint")
    );
    println!("Wind-free:    {}", on_off(snapshot.wind_free));
    println!("Auto-clean:   {}", on_off(snapshot.auto_clean));
    Ok(())
}

/// A single reading, one per capability getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Reading {
    Power,
    Mode,
    Temperature,
    Setpoint,
    WindFree,
    AutoClean,
}

/// Print one reading of a unit
pub async fn get(config: &Config, device: &str, reading: Reading) -> Result<()> {
    let ac = connect(config).await?;
    let device_id = device_id_for(&ac, device).await?;

    let value = match reading {
        Reading::Power => on_off(ac.get_power(&device_id).await?).to_string(),
        Reading::Mode => ac.get_mode(&device_id).await?,
        Reading::Temperature => ac.get_current_temperature(&device_id).await?.to_string(),
        Reading::Setpoint => ac.get_cooling_setpoint(&device_id).await?.to_string(),
        Reading::WindFree => on_off(ac.get_wind_free(&device_id).await?).to_string(),
        Reading::AutoClean => on_off(ac.get_auto_clean(&device_id).await?).to_string(),
    };
    println!("{}", value);
    Ok(())
}

/// Apply one setting to a unit
pub async fn set(config: &Config, device: &str, setting: Setting) -> Result<()> {
    let ac = connect(config).await?;
    let device_id = device_id_for(&ac, device).await?;
    if let Err(e) = ac.apply(&device_id, &setting).await {
        if e.requires_reauth() {
            tracing::warn!("Authentication failed; run 'smartthings-ac login' again");
        } else if let Some(status) = e.status() {
            tracing::debug!("SmartThings answered HTTP {}", status);
        }
        return Err(e).with_context(|| format!("Failed to apply {:?} to {}", setting, device));
    }
    println!("Sent {:?} to {}", setting, device);
    Ok(())
}

/// Confirm a webhook registration URL
pub async fn confirm_webhook(config: &Config, url: &str) -> Result<()> {
    let ac = connect(config).await?;
    ac.client().confirm_webhook(url).await?;
    println!("Webhook confirmed.");
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
