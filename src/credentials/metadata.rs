use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{http_client, read_token_response, Credential, TokenSupplier, CLOUD_PLATFORM_SCOPE};
use crate::error::AuthError;

pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Fetches tokens for the instance's attached service account.
#[derive(Debug, Clone)]
pub struct MetadataServerSupplier {
    base_url: String,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl MetadataServerSupplier {
    /// `base_url` is scheme + host, e.g. `http://169.254.169.254`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            http_client: http_client()?,
        })
    }

    /// Honors `GCE_METADATA_HOST`, defaulting to `metadata.google.internal`.
    pub fn from_env() -> Result<Self, AuthError> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::new(format!("http://{}", host))
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

#[async_trait]
impl TokenSupplier for MetadataServerSupplier {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        debug!(url = %url, "requesting token from metadata server");

        let fetched_at = Utc::now();
        let response = self
            .http_client
            .get(&url)
            .query(&[("scopes", self.scopes.join(","))])
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        read_token_response(response, fetched_at).await
    }

    fn name(&self) -> &'static str {
        "metadata-server"
    }
}
