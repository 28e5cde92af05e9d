pub mod http_client;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

pub use http_client::HttpTransport;

pub type Request = http::Request<Bytes>;
pub type Response = http::Response<Bytes>;

/// Moves a fully prepared request over the wire and returns the raw response.
///
/// Implementations own timeouts and cancellation; failures come back as an
/// opaque `TransportError` and are never interpreted by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}
