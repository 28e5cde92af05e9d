use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_REGION: &str = "us-east-1";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Read-only inputs of the bridge, fixed at client construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct BridgeConfig {
    /// Project sent to the backend with every request.
    pub backend_identity: String,
    pub endpoint: Url,
    /// Only used for native S3 signing; GCS ignores it.
    pub region: String,
}

/// On-disk shape; the endpoint falls back to [`DEFAULT_ENDPOINT`].
#[derive(Deserialize)]
struct RawConfig {
    #[serde(alias = "project_id")]
    backend_identity: String,
    #[serde(default)]
    endpoint: Option<Url>,
    #[serde(default = "default_region")]
    region: String,
}

impl TryFrom<RawConfig> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let endpoint = match raw.endpoint {
            Some(endpoint) => endpoint,
            None => Self::parse_endpoint(DEFAULT_ENDPOINT)?,
        };
        Ok(Self {
            backend_identity: raw.backend_identity,
            endpoint,
            region: raw.region,
        })
    }
}

impl BridgeConfig {
    pub fn new(backend_identity: impl Into<String>, endpoint: Url) -> Result<Self, ConfigError> {
        let cfg = Self {
            backend_identity: backend_identity.into(),
            endpoint,
            region: default_region(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
        Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint(raw.to_string(), e.to_string()))
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let cfg: BridgeConfig = serde_json::from_str(&raw).map_err(|e| file_error(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_identity.trim().is_empty() {
            return Err(ConfigError::MissingIdentity);
        }
        match self.endpoint.scheme() {
            "http" | "https" if self.endpoint.host().is_some() => Ok(()),
            _ => Err(ConfigError::InvalidEndpoint(
                self.endpoint.to_string(),
                "expected an http(s) URL with a host".into(),
            )),
        }
    }
}
