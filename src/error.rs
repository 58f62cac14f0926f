//! Error taxonomy for the SmartThings client

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the token authority, transport, status cache and
/// capability adapter.
///
/// `Clone` so a single in-flight fetch or refresh can hand the same outcome
/// to every waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No usable token material. Only the authorization-code flow recovers.
    #[error("not authenticated: {0}. Run 'smartthings-ac auth-url' and 'smartthings-ac login'.")]
    NotAuthenticated(String),

    #[error("authorization code exchange failed: {0}")]
    AuthExchangeFailed(String),

    /// Terminal for the current token pair; API calls stay halted until re-auth.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// Network failure, 5xx or 429 that outlived the retry budget.
    #[error("request failed after {attempts} attempt(s): {message}")]
    TransientHttp {
        attempts: usize,
        status: Option<u16>,
        message: String,
    },

    /// A 401 persisted after one refresh-and-retry cycle.
    #[error("access token rejected after refresh (HTTP 401); re-authentication may be required")]
    AuthExpired,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("status fetch for device {device_id} failed: {source}")]
    StatusFetchFailed {
        device_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("token store: {0}")]
    TokenStore(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for conditions that need the operator to redo the authorization-code flow.
    pub fn requires_reauth(&self) -> bool {
        match self {
            Error::NotAuthenticated(_)
            | Error::AuthExchangeFailed(_)
            | Error::RefreshFailed(_)
            | Error::AuthExpired => true,
            Error::StatusFetchFailed { source, .. } => source.requires_reauth(),
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::TransientHttp { status, .. } => *status,
            Error::AuthExpired => Some(401),
            Error::StatusFetchFailed { source, .. } => source.status(),
            _ => None,
        }
    }
}
