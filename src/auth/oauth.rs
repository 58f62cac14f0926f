//! OAuth2 authorization-code exchange and refresh for SmartThings
//!
//! [`TokenAuthority`] owns the in-memory token pair and the token file.
//! Refreshes run one at a time: callers that arrive while a refresh is in
//! flight wait for it and share its outcome instead of spending the refresh
//! token a second time.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpRequest,
    HttpResponse, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use tokio::sync::Mutex;

use super::tokens::{TokenPair, TokenStore};
use super::AuthSettings;
use crate::api::client::RetryPolicy;
use crate::error::{Error, Result};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

type TokenHttpError = oauth2::reqwest::Error<reqwest::Error>;
type TokenRequestError = RequestTokenError<TokenHttpError, BasicErrorResponse>;

/// Bearer token handed to the transport, tagged with the refresh generation
/// it was read in. A 401 for this token refreshes only if no newer
/// generation exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub secret: String,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct AuthState {
    tokens: Option<TokenPair>,
    /// Bumped whenever a refresh or code exchange completes (either way).
    generation: u64,
    /// Outcome of the most recent completed refresh, for joiners.
    last_error: Option<Error>,
    /// Set when the vendor rejected the refresh token.
    halted: Option<String>,
}

pub struct TokenAuthority {
    oauth: BasicClient,
    /// Token endpoint client: bounded by the request timeout, never follows redirects.
    http: reqwest::Client,
    retry: RetryPolicy,
    scope: String,
    store: TokenStore,
    state: RwLock<AuthState>,
    /// Serializes refresh and code exchange; also guards token file writes.
    refresh_lock: Mutex<()>,
}

impl TokenAuthority {
    pub fn new(settings: &AuthSettings, store: TokenStore) -> Result<Self> {
        let auth_url = AuthUrl::new(settings.authorize_url.clone())
            .map_err(|e| Error::InvalidConfig(format!("authorize_url: {}", e)))?;
        let token_url = TokenUrl::new(settings.token_url.clone())
            .map_err(|e| Error::InvalidConfig(format!("token_url: {}", e)))?;
        let redirect_url = RedirectUrl::new(settings.redirect_uri.clone())
            .map_err(|e| Error::InvalidConfig(format!("redirect_uri: {}", e)))?;

        let oauth = BasicClient::new(
            ClientId::new(settings.client_id.clone()),
            Some(ClientSecret::new(settings.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::BasicAuth)
        .set_redirect_uri(redirect_url);

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("token HTTP client: {}", e)))?;

        Ok(Self {
            oauth,
            http,
            retry: settings.retry.clone(),
            scope: settings.scope.clone(),
            store,
            state: RwLock::new(AuthState::default()),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// URL the operator opens to grant access. The CSRF state is returned so
    /// a callback handler can compare it.
    pub fn authorize_url(&self) -> (oauth2::url::Url, CsrfToken) {
        let mut request = self.oauth.authorize_url(CsrfToken::new_random);
        for scope in self.scope.split_whitespace() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        request.url()
    }

    /// Read the persisted token pair into memory.
    pub async fn load_tokens(&self) -> Result<()> {
        let pair = self.store.load().await?;
        tracing::info!(
            "Loaded tokens from {} (expires in {}s)",
            self.store.path().display(),
            pair.remaining_secs()
        );
        let mut state = self.write_state();
        state.tokens = Some(pair);
        state.halted = None;
        Ok(())
    }

    /// Current token pair, if any.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.read_state().tokens.clone()
    }

    /// Reason API calls are halted, if the last refresh was rejected.
    pub fn halted(&self) -> Option<String> {
        self.read_state().halted.clone()
    }

    /// Exchange an authorization code for a token pair and persist it.
    pub async fn exchange_auth_code(&self, code: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        tracing::info!("Exchanging authorization code for tokens...");

        let response = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(|request| send_token_request(self.http.clone(), request))
            .await
            .map_err(|e| Error::AuthExchangeFailed(describe_token_error(&e)))?;

        let refresh_token = response
            .refresh_token()
            .map(|rt| rt.secret().to_string())
            .ok_or_else(|| {
                Error::AuthExchangeFailed("token response has no refresh_token".to_string())
            })?;
        let pair = token_pair(&response, refresh_token);

        self.store.save(&pair).await?;

        let mut state = self.write_state();
        state.tokens = Some(pair);
        state.halted = None;
        state.last_error = None;
        state.generation += 1;
        tracing::info!("Authorization code exchanged; tokens saved");
        Ok(())
    }

    /// A bearer token that is not past its (margin-adjusted) expiry,
    /// refreshing first if needed.
    pub async fn access_token(&self) -> Result<AccessToken> {
        let observed = {
            let state = self.read_state();
            if let Some(reason) = &state.halted {
                return Err(Error::RefreshFailed(reason.clone()));
            }
            match &state.tokens {
                None => {
                    return Err(Error::NotAuthenticated("no tokens loaded".to_string()));
                }
                Some(pair) if !pair.is_expired() => {
                    return Ok(AccessToken {
                        secret: pair.access_token.clone(),
                        generation: state.generation,
                    });
                }
                Some(_) => state.generation,
            }
        };

        tracing::debug!("Access token expired, refreshing");
        self.refresh_after(observed).await
    }

    /// Refresh unconditionally (joining a refresh already in flight).
    pub async fn refresh(&self) -> Result<AccessToken> {
        let observed = {
            let state = self.read_state();
            if let Some(reason) = &state.halted {
                return Err(Error::RefreshFailed(reason.clone()));
            }
            state.generation
        };
        self.refresh_after(observed).await
    }

    /// Refresh unless a refresh completed after `observed` was read, in which
    /// case its outcome is returned without another vendor call.
    pub async fn refresh_after(&self, observed: u64) -> Result<AccessToken> {
        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.read_state();
            if state.generation != observed {
                if let Some(err) = &state.last_error {
                    return Err(err.clone());
                }
                if let Some(reason) = &state.halted {
                    return Err(Error::RefreshFailed(reason.clone()));
                }
                if let Some(pair) = &state.tokens {
                    return Ok(AccessToken {
                        secret: pair.access_token.clone(),
                        generation: state.generation,
                    });
                }
            }
        }

        let result = self.refresh_locked().await;

        let mut state = self.write_state();
        state.generation += 1;
        state.last_error = result.as_ref().err().cloned();
        result.map(|secret| AccessToken {
            secret,
            generation: state.generation,
        })
    }

    /// Performs the `grant_type=refresh_token` call. Caller holds `refresh_lock`.
    async fn refresh_locked(&self) -> Result<String> {
        let current = self.read_state().tokens.clone();
        let Some(current) = current.filter(|pair| !pair.refresh_token.is_empty()) else {
            let reason = "no refresh token available".to_string();
            self.halt(&reason);
            return Err(Error::RefreshFailed(reason));
        };

        tracing::info!("Refreshing SmartThings access token...");

        let attempts = self.retry.max_attempts.max(1);
        let refresh_token = RefreshToken::new(current.refresh_token.clone());
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self
                .oauth
                .exchange_refresh_token(&refresh_token)
                .request_async(|request| send_token_request(self.http.clone(), request))
                .await
            {
                Ok(response) => break response,
                // Network failures and timeouts: retried like any other transient failure.
                Err(RequestTokenError::Request(e)) => {
                    let message = describe_http_error(&e);
                    if attempt >= attempts {
                        tracing::warn!(
                            "Token refresh failed after {} attempt(s): {}",
                            attempt,
                            message
                        );
                        return Err(Error::TransientHttp {
                            attempts: attempt,
                            status: None,
                            message: format!("token refresh: {}", message),
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!("Token refresh failed: {}, retrying in {:?}", message, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let reason = describe_token_error(&e);
                    self.halt(&reason);
                    return Err(Error::RefreshFailed(reason));
                }
            }
        };

        // Some servers rotate the refresh token, others keep it.
        let refresh_token = response
            .refresh_token()
            .map(|rt| rt.secret().to_string())
            .unwrap_or(current.refresh_token);
        let pair = token_pair(&response, refresh_token);
        let secret = pair.access_token.clone();

        self.write_state().tokens = Some(pair.clone());
        if let Err(e) = self.store.save(&pair).await {
            tracing::error!("Refreshed tokens could not be persisted: {}", e);
            return Err(e);
        }

        tracing::info!("Token refresh complete");
        Ok(secret)
    }

    fn halt(&self, reason: &str) {
        tracing::error!(
            "SmartThings rejected the refresh token ({}). API calls are halted until re-authentication.",
            reason
        );
        self.write_state().halted = Some(reason.to_string());
    }

    /// Forget tokens in memory and on disk.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.store.clear().await?;
        let mut state = self.write_state();
        state.tokens = None;
        state.halted = None;
        state.last_error = None;
        state.generation += 1;
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, AuthState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AuthState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn token_pair(response: &BasicTokenResponse, refresh_token: String) -> TokenPair {
    TokenPair::new(
        response.access_token().secret().to_string(),
        refresh_token,
        response
            .expires_in()
            .map(|d| d.as_secs())
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
    )
}

/// Sends an oauth2 token request through `client`. 5xx and 429 come back as
/// transport errors so refresh retries them instead of halting.
async fn send_token_request(
    client: reqwest::Client,
    request: HttpRequest,
) -> std::result::Result<HttpResponse, TokenHttpError> {
    let mut builder = client
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder
        .send()
        .await
        .map_err(oauth2::reqwest::Error::Reqwest)?;
    let status_code = response.status();
    if status_code.is_server_error() || status_code == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(oauth2::reqwest::Error::Other(format!(
            "token endpoint answered HTTP {}",
            status_code.as_u16()
        )));
    }
    let headers = response.headers().to_owned();
    let body = response
        .bytes()
        .await
        .map_err(oauth2::reqwest::Error::Reqwest)?;

    Ok(HttpResponse {
        status_code,
        headers,
        body: body.to_vec(),
    })
}

/// oauth2's wrapper only says "request failed"; the reqwest error says why.
fn describe_http_error(err: &TokenHttpError) -> String {
    match err {
        oauth2::reqwest::Error::Reqwest(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// Vendor error body where there is one, transport error otherwise.
fn describe_token_error(err: &TokenRequestError) -> String {
    match err {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Parse(e, body) => {
            let body = String::from_utf8_lossy(body);
            if body.trim().is_empty() {
                e.to_string()
            } else {
                body.into_owned()
            }
        }
        RequestTokenError::Request(e) => describe_http_error(e),
        RequestTokenError::Other(msg) => msg.clone(),
    }
}
