use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{http_client, read_token_response, Credential, TokenSupplier, CLOUD_PLATFORM_SCOPE};
use crate::error::AuthError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Application default credentials file, as written by gcloud or the IAM console.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    AuthorizedUser(AuthorizedUser),
    ServiceAccount(ServiceAccount),
}

impl CredentialsFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let file_error = |reason: String| AuthError::CredentialsFile {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| file_error(e.to_string()))
    }

    pub fn into_supplier(self) -> Result<Arc<dyn TokenSupplier>, AuthError> {
        Ok(match self {
            CredentialsFile::AuthorizedUser(user) => Arc::new(AuthorizedUserSupplier::new(user)?),
            CredentialsFile::ServiceAccount(account) => {
                Arc::new(ServiceAccountSupplier::new(account)?)
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri", alias = "token_url")]
    pub token_uri: String,
}

#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// Exchanges a user refresh token for access tokens.
#[derive(Debug, Clone)]
pub struct AuthorizedUserSupplier {
    user: AuthorizedUser,
    http_client: reqwest::Client,
}

impl AuthorizedUserSupplier {
    pub fn new(user: AuthorizedUser) -> Result<Self, AuthError> {
        Ok(Self {
            user,
            http_client: http_client()?,
        })
    }
}

#[async_trait]
impl TokenSupplier for AuthorizedUserSupplier {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        debug!(token_uri = %self.user.token_uri, "refreshing user access token");
        let fetched_at = Utc::now();
        let response = self
            .http_client
            .post(&self.user.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.user.client_id.as_str()),
                ("client_secret", self.user.client_secret.as_str()),
                ("refresh_token", self.user.refresh_token.as_str()),
            ])
            .send()
            .await?;
        read_token_response(response, fetched_at).await
    }

    fn name(&self) -> &'static str {
        "authorized-user"
    }
}

/// Trades a self-signed RS256 assertion for service account access tokens.
pub struct ServiceAccountSupplier {
    account: ServiceAccount,
    key_pair: RsaKeyPair,
    rng: SystemRandom,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ServiceAccountSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountSupplier")
            .field("account", &self.account)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountSupplier {
    pub fn new(account: ServiceAccount) -> Result<Self, AuthError> {
        let der = pem_to_der(&account.private_key)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| AuthError::Signing(format!("rejected private key: {}", e)))?;
        Ok(Self {
            account,
            key_pair,
            rng: SystemRandom::new(),
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            http_client: http_client()?,
        })
    }

    /// Builds the signed JWT presented to the token endpoint.
    pub fn assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let mut header = json!({"alg": "RS256", "typ": "JWT"});
        if let Some(kid) = &self.account.private_key_id {
            header["kid"] = json!(kid);
        }
        let claims = json!({
            "iss": self.account.client_email,
            "scope": self.scopes.join(" "),
            "aud": self.account.token_uri,
            "iat": issued_at,
            "exp": issued_at + ASSERTION_LIFETIME_SECS,
        });

        let encode = |value: &serde_json::Value| general_purpose::URL_SAFE_NO_PAD.encode(value.to_string());
        let signing_input = format!("{}.{}", encode(&header), encode(&claims));

        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &self.rng, signing_input.as_bytes(), &mut signature)
            .map_err(|_| AuthError::Signing("RSA signing failed".into()))?;

        Ok(format!(
            "{}.{}",
            signing_input,
            general_purpose::URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

#[async_trait]
impl TokenSupplier for ServiceAccountSupplier {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        let fetched_at = Utc::now();
        let assertion = self.assertion(fetched_at.timestamp())?;
        debug!(
            client_email = %self.account.client_email,
            token_uri = %self.account.token_uri,
            "exchanging service account assertion"
        );
        let response = self
            .http_client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        read_token_response(response, fetched_at).await
    }

    fn name(&self) -> &'static str {
        "service-account"
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>, AuthError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    if body.is_empty() {
        return Err(AuthError::Signing("private key is empty".into()));
    }
    general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AuthError::Signing(format!("private key is not valid PEM: {}", e)))
}
