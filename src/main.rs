//! smartthings-ac - SmartThings air conditioner client
//!
//! Authorizes against SmartThings once, then reads and controls air
//! conditioners through the SmartThings REST API.

mod api;
mod auth;
mod config;
mod error;
mod models;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{Reading, Setting};
use crate::config::{Config, DeviceConfig};

#[derive(Parser)]
#[command(name = "smartthings-ac")]
#[command(about = "Control SmartThings air conditioners from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write OAuth client settings and bridged devices to the config file
    Init {
        #[arg(long)]
        client_id: String,

        #[arg(long)]
        client_secret: String,

        /// Redirect URI registered with the SmartThings OAuth client
        #[arg(long)]
        redirect_uri: String,

        /// Device label to bridge (repeatable)
        #[arg(short, long = "device", required = true)]
        devices: Vec<String>,
    },

    /// Print the SmartThings authorization URL
    AuthUrl,

    /// Exchange an authorization code for tokens
    Login {
        /// The `code` query parameter from the OAuth redirect
        #[arg(long)]
        code: String,
    },

    /// Clear stored tokens
    Logout,

    /// Refresh the access token now
    Refresh,

    /// Show current authentication status
    Status,

    /// List SmartThings devices
    Devices,

    /// Show the state of an air conditioner
    Show {
        /// Device id or label
        device: String,
    },

    /// Print a single reading of an air conditioner
    Get {
        /// Device id or label
        device: String,

        #[arg(value_enum)]
        reading: Reading,
    },

    /// Change a setting on an air conditioner
    Set {
        /// Device id or label
        device: String,

        #[command(subcommand)]
        setting: SetCommand,
    },

    /// Answer a webhook CONFIRMATION lifecycle event
    ConfirmWebhook {
        /// confirmationUrl from the CONFIRMATION payload
        url: String,
    },
}

#[derive(Subcommand)]
enum SetCommand {
    /// Power on or off
    Power {
        #[arg(value_parser = parse_on_off, action = clap::ArgAction::Set)]
        state: bool,
    },
    /// Operating mode as SmartThings names it (cool, dry, heat, auto, off, ...)
    Mode { mode: String },
    /// Cooling setpoint in degrees
    Temp { celsius: f64 },
    /// Wind-free airflow
    WindFree {
        #[arg(value_parser = parse_on_off, action = clap::ArgAction::Set)]
        state: bool,
    },
    /// Automatic coil cleaning
    AutoClean {
        #[arg(value_parser = parse_on_off, action = clap::ArgAction::Set)]
        state: bool,
    },
}

impl From<SetCommand> for Setting {
    fn from(cmd: SetCommand) -> Self {
        match cmd {
            SetCommand::Power { state } => Setting::Power(state),
            SetCommand::Mode { mode } => Setting::Mode(mode),
            SetCommand::Temp { celsius } => Setting::Temperature(celsius),
            SetCommand::WindFree { state } => Setting::WindFree(state),
            SetCommand::AutoClean { state } => Setting::AutoClean(state),
        }
    }
}

fn parse_on_off(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected on or off, got '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Commands::Init {
            client_id,
            client_secret,
            redirect_uri,
            devices,
        } => {
            let config = Config {
                client_id: Some(client_id),
                client_secret: Some(client_secret),
                redirect_uri: Some(redirect_uri),
                devices: devices
                    .into_iter()
                    .map(|label| DeviceConfig { label })
                    .collect(),
                ..config
            };
            config.validate()?;
            config
                .save_to(&config_path)
                .with_context(|| format!("Failed to save {}", config_path.display()))?;
            println!("Config written to {}", config_path.display());
        }
        Commands::AuthUrl => {
            auth::authorize(&config)?;
        }
        Commands::Login { code } => {
            if code.trim().is_empty() {
                bail!("Authorization code is empty");
            }
            tracing::info!("Exchanging authorization code...");
            auth::login(&config, &code).await?;
        }
        Commands::Logout => {
            auth::logout(&config).await?;
        }
        Commands::Refresh => {
            auth::refresh(&config).await?;
        }
        Commands::Status => {
            auth::status(&config).await?;
        }
        Commands::Devices => {
            tracing::info!("Fetching devices...");
            api::list_devices(&config).await?;
        }
        Commands::Show { device } => {
            api::show(&config, &device).await?;
        }
        Commands::Get { device, reading } => {
            api::get(&config, &device, reading).await?;
        }
        Commands::Set { device, setting } => {
            api::set(&config, &device, setting.into()).await?;
        }
        Commands::ConfirmWebhook { url } => {
            api::confirm_webhook(&config, &url).await?;
        }
    }

    Ok(())
}
