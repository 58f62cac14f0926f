//! Token storage and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Subtracted from the vendor's `expires_in` so refresh happens before the
/// access token actually lapses.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// OAuth2 token pair as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds, already reduced by the safety margin.
    pub expires_at: i64,
}

impl TokenPair {
    pub fn new(access_token: String, refresh_token: String, expires_in_secs: u64) -> Self {
        let expires_in = i64::try_from(expires_in_secs).unwrap_or(i64::MAX / 2);
        Self {
            access_token,
            refresh_token,
            expires_at: now_secs() + expires_in - EXPIRY_SAFETY_MARGIN_SECS,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }

    /// Seconds until the (margin-adjusted) expiry; negative once expired.
    pub fn remaining_secs(&self) -> i64 {
        self.expires_at - now_secs()
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// JSON file holding the current [`TokenPair`].
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so readers never observe a partially written pair.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted pair. Absent or malformed files yield `NotAuthenticated`.
    pub async fn load(&self) -> Result<TokenPair> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotAuthenticated(format!(
                    "no token file at {}",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::TokenStore(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let pair: TokenPair = serde_json::from_str(&content).map_err(|e| {
            Error::NotAuthenticated(format!(
                "malformed token file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(Error::NotAuthenticated(format!(
                "token file {} is missing access or refresh token",
                self.path.display()
            )));
        }

        Ok(pair)
    }

    pub async fn save(&self, pair: &TokenPair) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    Error::TokenStore(format!("failed to create {}: {}", dir.display(), e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(pair)
            .map_err(|e| Error::TokenStore(format!("failed to serialize tokens: {}", e)))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::TokenStore(format!("failed to write {}: {}", tmp.display(), e)))?;

        // Restrictive permissions: the file holds bearer credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = tokio::fs::set_permissions(&tmp, perms).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Error::TokenStore(format!(
                    "failed to set permissions on {}: {}",
                    tmp.display(),
                    e
                )));
            }
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::TokenStore(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        tracing::debug!("Tokens written to {}", self.path.display());
        Ok(())
    }

    /// Remove the token file. Missing files are not an error.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TokenStore(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
