//! Authentication module for SmartThings
//!
//! Implements the OAuth2 authorization-code flow against the SmartThings
//! token endpoint and keeps a refreshed bearer token available for API calls.

pub mod oauth;
pub mod tokens;

use std::time::Duration;

use crate::api::client::{RetryPolicy, DEFAULT_TIMEOUT};

pub use oauth::{AccessToken, TokenAuthority};
pub use tokens::{TokenPair, TokenStore};

pub const DEFAULT_AUTHORIZE_URL: &str = "https://api.smartthings.com/oauth/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.smartthings.com/oauth/token";
pub const DEFAULT_SCOPE: &str = "r:devices:* w:devices:* x:devices:*";

/// SmartThings OAuth client registration
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Must match the redirect URI used for the authorize step exactly.
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Space-separated scopes
    pub scope: String,
    /// Per-request timeout for token endpoint calls
    pub timeout: Duration,
    /// Applied to network failures and timeouts during refresh
    pub retry: RetryPolicy,
}

impl AuthSettings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Token authority for the configured OAuth client and token file.
pub fn authority(config: &crate::config::Config) -> anyhow::Result<TokenAuthority> {
    let settings = config.auth_settings()?;
    let store = TokenStore::new(config.token_path()?);
    Ok(TokenAuthority::new(&settings, store)?)
}

/// Print the URL that starts the authorization-code flow
pub fn authorize(config: &crate::config::Config) -> anyhow::Result<()> {
    let authority = authority(config)?;
    let (url, _state) = authority.authorize_url();

    println!();
    println!("To authorize, open this URL and allow access:");
    println!("  {}", url);
    println!();
    println!("SmartThings redirects to your redirect_uri with ?code=...");
    println!("Then run: smartthings-ac login --code <CODE>");
    Ok(())
}

/// Exchange an authorization code and save the tokens
pub async fn login(config: &crate::config::Config, code: &str) -> anyhow::Result<()> {
    let authority = authority(config)?;
    authority.exchange_auth_code(code.trim()).await?;
    println!(
        "Login successful. Tokens saved to {}",
        authority.store().path().display()
    );
    Ok(())
}

/// Clear stored tokens
pub async fn logout(config: &crate::config::Config) -> anyhow::Result<()> {
    let authority = authority(config)?;
    authority.clear().await?;
    println!("Logged out.");
    Ok(())
}

/// Display current token status
pub async fn status(config: &crate::config::Config) -> anyhow::Result<()> {
    let authority = authority(config)?;
    println!("Token file:  {}", authority.store().path().display());

    if let Err(e) = authority.load_tokens().await {
        println!("Tokens:      none ({})", e);
        println!("\nRun 'smartthings-ac auth-url' and 'smartthings-ac login' to authenticate.");
        return Ok(());
    }

    if let Some(pair) = authority.tokens() {
        let expires = chrono::DateTime::from_timestamp(pair.expires_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| pair.expires_at.to_string());
        if pair.is_expired() {
            println!("Access token: expired (will refresh on next request)");
        } else {
            println!("Access token: valid");
        }
        println!("  expires_at: {}", expires);
        println!("Refresh tok: present");
    }
    Ok(())
}

/// Force a token refresh using the stored refresh token
pub async fn refresh(config: &crate::config::Config) -> anyhow::Result<()> {
    let authority = authority(config)?;
    authority.load_tokens().await?;

    match authority.refresh().await {
        Ok(_) => {
            println!(
                "Tokens refreshed and saved to {}",
                authority.store().path().display()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(reason) = authority.halted() {
                tracing::warn!("Refresh token rejected: {}", reason);
                println!("Run 'smartthings-ac auth-url' and 'smartthings-ac login' again.");
            }
            Err(e.into())
        }
    }
}
