pub mod adc;
pub mod metadata;
pub mod token_cache;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::AuthError;

pub use adc::CredentialsFile;
pub use metadata::MetadataServerSupplier;
pub use token_cache::CredentialCache;

/// OAuth scope requested from every identity source.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Time source used for liveness checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A bearer token and the instant it stops being valid.
///
/// No expiry means the token never goes stale.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

// Keep tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Liveness check: an absent credential is expired, a credential without expiry never is.
pub fn is_expired(credential: Option<&Credential>, now: DateTime<Utc>) -> bool {
    credential.map_or(true, |c| c.is_expired_at(now))
}

/// Produces bearer tokens from some identity service.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn fetch(&self) -> Result<Credential, AuthError>;

    fn name(&self) -> &'static str;
}

/// Hands out a fixed token, e.g. one minted by `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticTokenSupplier {
    credential: Credential,
}

impl StaticTokenSupplier {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(access_token, None),
        }
    }

    pub fn with_expiry(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            credential: Credential::new(access_token, Some(expiry)),
        }
    }
}

#[async_trait]
impl TokenSupplier for StaticTokenSupplier {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Body returned by OAuth token endpoints and the metadata server.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    pub(crate) fn into_credential(self, fetched_at: DateTime<Utc>) -> Result<Credential, AuthError> {
        let token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("access_token missing".into()))?;
        let expiry = match self.expires_in {
            None => None,
            Some(secs) if secs <= 0 => {
                return Err(AuthError::MalformedResponse(format!(
                    "expires_in must be positive, got {}",
                    secs
                )))
            }
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|lifetime| fetched_at.checked_add_signed(lifetime))
                    .ok_or_else(|| AuthError::MalformedResponse("expires_in out of range".into()))?,
            ),
        };
        Ok(Credential::new(token, expiry))
    }
}

/// Reads an OAuth token response, mapping non-success statuses to `AuthError::Status`.
pub(crate) async fn read_token_response(
    response: reqwest::Response,
    fetched_at: DateTime<Utc>,
) -> Result<Credential, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    parsed.into_credential(fetched_at)
}

pub(crate) fn http_client() -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(AuthError::from)
}

fn well_known_credentials_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gcloud").join("application_default_credentials.json"))
}

/// Resolves the ambient identity of this process.
///
/// Order: explicit access token, `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud
/// well-known file, then the metadata server.
pub fn default_supplier(explicit_token: Option<String>) -> Result<Arc<dyn TokenSupplier>, AuthError> {
    let explicit = explicit_token
        .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
        .filter(|t| !t.trim().is_empty());
    if let Some(token) = explicit {
        debug!("using explicit access token");
        return Ok(Arc::new(StaticTokenSupplier::new(token)));
    }

    if let Ok(path) = std::env::var(CREDENTIALS_FILE_ENV) {
        debug!(path = %path, "using credentials file from {}", CREDENTIALS_FILE_ENV);
        return CredentialsFile::from_path(&path)?.into_supplier();
    }

    if let Some(path) = well_known_credentials_file().filter(|p| p.is_file()) {
        debug!(path = %path.display(), "using gcloud application default credentials");
        return CredentialsFile::from_path(&path)?.into_supplier();
    }

    debug!("falling back to metadata server credentials");
    Ok(Arc::new(MetadataServerSupplier::from_env()?))
}
