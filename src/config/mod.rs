//! Configuration storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::cache::DEFAULT_TTL;
use crate::api::client::{RetryPolicy, DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use crate::api::PowerPolicy;
use crate::auth::{AuthSettings, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPE, DEFAULT_TOKEN_URL};

/// A SmartThings device to bridge, matched by label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub label: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SmartThings OAuth client ID
    pub client_id: Option<String>,
    /// SmartThings OAuth client secret
    pub client_secret: Option<String>,
    /// Redirect URI registered with the OAuth client; also sent on code exchange
    pub redirect_uri: Option<String>,
    pub api_base: String,
    pub token_url: String,
    pub authorize_url: String,
    pub scope: String,
    /// Token file location (defaults to the data dir)
    pub token_file: Option<PathBuf>,
    pub cache_ttl_ms: u64,
    /// Serve the last known status when a refresh of it fails
    pub stale_on_error: bool,
    pub power: PowerPolicy,
    /// Mode used to power on when power is modelled through the mode attribute
    pub resume_mode: String,
    pub request_timeout_secs: u64,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    /// Kept last: TOML arrays of tables must follow plain values.
    pub devices: Vec<DeviceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            token_file: None,
            cache_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            stale_on_error: false,
            power: PowerPolicy::Auto,
            resume_mode: "cool".to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_attempts: 3,
            retry_backoff_ms: 1000,
            devices: Vec::new(),
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "smartthings-ac", "smartthings-ac")
            .context("Could not determine config directory")
    }

    /// Get config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the client secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Check the settings needed to talk to SmartThings at all.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            bail!(
                "SmartThings credentials not configured (missing: {})",
                missing.join(", ")
            );
        }
        if self.devices.is_empty() {
            bail!("No devices configured");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn auth_settings(&self) -> Result<AuthSettings> {
        let client_id = self.client_id.clone().context("client_id is not set")?;
        let client_secret = self
            .client_secret
            .clone()
            .context("client_secret is not set")?;
        let redirect_uri = self
            .redirect_uri
            .clone()
            .context("redirect_uri is not set")?;

        let mut settings = AuthSettings::new(client_id, client_secret, redirect_uri);
        settings.authorize_url = self.authorize_url.clone();
        settings.token_url = self.token_url.clone();
        settings.scope = self.scope.clone();
        settings.timeout = self.request_timeout();
        settings.retry = self.retry_policy();
        Ok(settings)
    }

    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.token_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("tokens.json")),
        }
    }

    pub fn device_labels(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.label.clone()).collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api_base, "https://api.smartthings.com/v1");
        assert_eq!(config.cache_ttl(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.power, PowerPolicy::Auto);
        assert!(!config.stale_on_error);
    }

    #[test]
    fn test_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
client_id = "id"
client_secret = "secret"
redirect_uri = "https://example.com/oauth/callback"
power = "mode"
stale_on_error = true

[[devices]]
label = "Living Room AC"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.power, PowerPolicy::Mode);
        assert!(config.stale_on_error);
        assert_eq!(config.device_labels(), vec!["Living Room AC"]);
        // Unset fields keep their defaults.
        assert_eq!(config.resume_mode, "cool");

        let settings = config.auth_settings().unwrap();
        assert_eq!(settings.redirect_uri, "https://example.com/oauth/callback");
        assert_eq!(settings.token_url, "https://api.smartthings.com/oauth/token");
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let config = Config {
            client_id: Some("id".into()),
            client_secret: Some("  ".into()),
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client_secret"));
        assert!(err.contains("redirect_uri"));
        assert!(!err.contains("client_id"));

        let config = Config {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            redirect_uri: Some("https://localhost".into()),
            ..Config::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("No devices"));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let config = Config {
            client_id: Some("id".into()),
            devices: vec![DeviceConfig {
                label: "Bedroom AC".into(),
            }],
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("id"));
        assert_eq!(loaded.devices, config.devices);
    }
}
