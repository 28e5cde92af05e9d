use thiserror::Error;

/// The identity service could not produce a live bearer credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("invalid credentials file {path}: {reason}")]
    CredentialsFile { path: String, reason: String },

    #[error("failed to sign token assertion: {0}")]
    Signing(String),

    #[error("no credential source available: {0}")]
    Unavailable(String),
}

/// Opaque failure from the transport collaborator.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl TransportError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("backend identity must not be empty")]
    MissingIdentity,

    #[error("invalid endpoint {0:?}: {1}")]
    InvalidEndpoint(String, String),

    #[error("reading config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Per-request failure surfaced by the pipeline and the storage client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("credential error: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend returned status {status}: {body}")]
    Backend { status: u16, body: String },
}

impl Error {
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
