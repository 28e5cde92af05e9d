//! Request lifecycle: named handler lists run around a transport call.
//!
//! A request passes through `build` (decoration), `sign`, and `send`
//! (last-moment rewrites) before the transport sees it. The response then
//! passes through `complete` before the caller gets it.

pub mod handlers;
pub mod signer;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::credentials::CredentialCache;
use crate::error::Result;
use crate::transport::{Request, Response, Transport};

pub use handlers::{
    ContentLength, InvocationId, NamespaceRewrite, ResponseNamespaceRewrite, UserAgent,
};
pub use signer::{AwsCredentials, BearerSigner, SigV4Signer, Signer};

/// A step that may mutate, or abort, an outgoing request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &mut Request) -> Result<()>;
}

/// A step over a received response. Response steps cannot fail.
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, response: &mut Response);
}

pub struct NamedHandler<H: ?Sized> {
    pub name: &'static str,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Clone for NamedHandler<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Ordered list of named handlers.
pub struct HandlerList<H: ?Sized> {
    handlers: Vec<NamedHandler<H>>,
}

impl<H: ?Sized> Clone for HandlerList<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> Default for HandlerList<H> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<H: ?Sized> HandlerList<H> {
    pub fn push_back(&mut self, name: &'static str, handler: Arc<H>) {
        self.handlers.push(NamedHandler { name, handler });
    }

    pub fn push_front(&mut self, name: &'static str, handler: Arc<H>) {
        self.handlers.insert(0, NamedHandler { name, handler });
    }

    /// Removes every handler registered under `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name != name);
        self.handlers.len() != before
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &NamedHandler<H>> {
        self.handlers.iter()
    }
}

#[derive(Clone, Default)]
pub struct Handlers {
    pub build: HandlerList<dyn RequestHandler>,
    pub sign: HandlerList<dyn RequestHandler>,
    pub send: HandlerList<dyn RequestHandler>,
    pub complete: HandlerList<dyn ResponseHandler>,
}

#[derive(Clone, Default)]
pub struct Pipeline {
    pub handlers: Handlers,
}

impl Pipeline {
    /// The native S3 lifecycle with the given signer as the signing step.
    pub fn s3(signer: Arc<dyn Signer>) -> Self {
        let mut handlers = Handlers::default();
        handlers.build.push_back(UserAgent::NAME, Arc::new(UserAgent::default()));
        handlers.build.push_back(InvocationId::NAME, Arc::new(InvocationId));
        handlers.sign.push_back(ContentLength::NAME, Arc::new(ContentLength));
        let name = signer.name();
        handlers.sign.push_back(name, signer_handler(signer));
        Self { handlers }
    }

    /// S3 lifecycle re-wired for a GCS backend.
    ///
    /// Native signing is removed; the bearer signer is the only sign step, the
    /// `x-amz-` to `x-goog-` rewrite is the last mutation before transmission,
    /// and the reverse rewrite runs on every response.
    pub fn gcs(cache: CredentialCache, config: &BridgeConfig) -> Self {
        let signer: Arc<dyn Signer> = Arc::new(BearerSigner::new(
            cache,
            config.backend_identity.clone(),
        ));
        let mut pipeline = Self::s3(signer);
        pipeline
            .handlers
            .send
            .push_front(NamespaceRewrite::NAME, Arc::new(NamespaceRewrite::outbound()));
        pipeline.handlers.complete.push_back(
            ResponseNamespaceRewrite::NAME,
            Arc::new(ResponseNamespaceRewrite::inbound()),
        );
        pipeline
    }

    /// Clears the sign list and installs content-length followed by `signer`.
    pub fn replace_signer(&mut self, signer: Arc<dyn Signer>) {
        let sign = &mut self.handlers.sign;
        sign.clear();
        sign.push_back(ContentLength::NAME, Arc::new(ContentLength));
        let name = signer.name();
        sign.push_back(name, signer_handler(signer));
    }

    /// Runs every phase in order around a single transport call.
    ///
    /// Any request-phase error aborts before the transport is invoked.
    pub async fn execute(&self, mut request: Request, transport: &dyn Transport) -> Result<Response> {
        for phase in [&self.handlers.build, &self.handlers.sign, &self.handlers.send] {
            for step in phase.iter() {
                step.handler.handle(&mut request).await?;
            }
        }

        let method = request.method().clone();
        let uri = request.uri().clone();
        let mut response = transport.send(request).await?;

        for step in self.handlers.complete.iter() {
            step.handler.handle(&mut response);
        }
        debug!(method = %method, uri = %uri, status = %response.status(), "request completed");
        Ok(response)
    }
}

fn signer_handler(signer: Arc<dyn Signer>) -> Arc<dyn RequestHandler> {
    Arc::new(SignStep(signer))
}

struct SignStep(Arc<dyn Signer>);

#[async_trait]
impl RequestHandler for SignStep {
    async fn handle(&self, request: &mut Request) -> Result<()> {
        self.0.sign(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{StaticTokenSupplier, TokenSupplier};
    use crate::error::{AuthError, Error, TransportError};
    use bytes::Bytes;
    use std::sync::Mutex;
    use url::Url;

    /// Records the request it was handed and answers with canned headers.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<Request>>,
        response_headers: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: Request) -> std::result::Result<Response, TransportError> {
            self.seen.lock().unwrap().push(request);
            let mut builder = http::Response::builder().status(200);
            for (k, v) in &self.response_headers {
                builder = builder.header(*k, *v);
            }
            Ok(builder.body(Bytes::new()).unwrap())
        }
    }

    struct FailingSupplier;

    #[async_trait]
    impl TokenSupplier for FailingSupplier {
        async fn fetch(&self) -> std::result::Result<crate::credentials::Credential, AuthError> {
            Err(AuthError::Unavailable("metadata server unreachable".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig::new("my-project", Url::parse("https://storage.googleapis.com").unwrap())
            .unwrap()
    }

    fn gcs_pipeline(token: &str) -> Pipeline {
        let cache = CredentialCache::new(Arc::new(StaticTokenSupplier::new(token)));
        Pipeline::gcs(cache, &config())
    }

    fn put_request() -> Request {
        http::Request::builder()
            .method("PUT")
            .uri("https://storage.googleapis.com/bucket/filename.txt")
            .header("authorization", "AWS4-HMAC-SHA256 Credential=stale")
            .header("x-amz-acl", "private")
            .header("x-amz-meta-key01", "foo")
            .body(Bytes::from_static(b"lorem ipsum"))
            .unwrap()
    }

    #[test]
    fn gcs_pipeline_replaces_native_signing() {
        let pipeline = gcs_pipeline("tok1");
        assert_eq!(
            pipeline.handlers.sign.names(),
            vec![ContentLength::NAME, BearerSigner::NAME]
        );
        assert!(!pipeline.handlers.sign.names().contains(&SigV4Signer::NAME));
        assert_eq!(pipeline.handlers.send.names(), vec![NamespaceRewrite::NAME]);
        assert_eq!(
            pipeline.handlers.complete.names(),
            vec![ResponseNamespaceRewrite::NAME]
        );
    }

    #[test]
    fn s3_pipeline_signs_natively() {
        let signer = Arc::new(SigV4Signer::new(
            AwsCredentials::new("AKID", "secret"),
            "us-east-1",
        ));
        let pipeline = Pipeline::s3(signer);
        assert_eq!(
            pipeline.handlers.build.names(),
            vec![UserAgent::NAME, InvocationId::NAME]
        );
        assert_eq!(
            pipeline.handlers.sign.names(),
            vec![ContentLength::NAME, SigV4Signer::NAME]
        );
        assert!(pipeline.handlers.send.is_empty());
    }

    #[test]
    fn replace_signer_drops_native_signing() {
        let signer = Arc::new(SigV4Signer::new(
            AwsCredentials::new("AKID", "secret"),
            "us-east-1",
        ));
        let mut pipeline = Pipeline::s3(signer);
        pipeline.handlers.sign.push_back("extra", Arc::new(ContentLength));

        let cache = CredentialCache::new(Arc::new(StaticTokenSupplier::new("tok")));
        pipeline.replace_signer(Arc::new(BearerSigner::new(cache, "p")));

        assert_eq!(
            pipeline.handlers.sign.names(),
            vec![ContentLength::NAME, BearerSigner::NAME]
        );
    }

    #[tokio::test]
    async fn outbound_request_carries_bearer_and_goog_headers_only() {
        let transport = RecordingTransport::default();
        gcs_pipeline("tok1")
            .execute(put_request(), &transport)
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        let headers = seen[0].headers();
        assert_eq!(headers["authorization"], "Bearer tok1");
        assert_eq!(headers.get_all("authorization").iter().count(), 1);
        assert_eq!(headers["x-goog-project-id"], "my-project");
        assert_eq!(headers["x-goog-acl"], "private");
        assert_eq!(headers["x-goog-meta-key01"], "foo");
        assert_eq!(headers["content-length"], "11");
        assert!(!headers.keys().any(|k| k.as_str().starts_with("x-amz-")));
    }

    #[tokio::test]
    async fn response_headers_come_back_in_amz_vocabulary() {
        let transport = RecordingTransport {
            response_headers: vec![("x-goog-generation", "17"), ("etag", "\"abc\"")],
            ..Default::default()
        };
        let response = gcs_pipeline("tok1")
            .execute(put_request(), &transport)
            .await
            .unwrap();

        assert_eq!(response.headers()["x-amz-generation"], "17");
        assert_eq!(response.headers()["etag"], "\"abc\"");
        assert!(response.headers().get("x-goog-generation").is_none());
    }

    #[tokio::test]
    async fn credential_failure_aborts_before_transport() {
        let cache = CredentialCache::new(Arc::new(FailingSupplier));
        let pipeline = Pipeline::gcs(cache, &config());
        let transport = RecordingTransport::default();

        let err = pipeline.execute(put_request(), &transport).await.unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_handlers_run_after_signing() {
        struct AddAmzHeader;

        #[async_trait]
        impl RequestHandler for AddAmzHeader {
            async fn handle(&self, request: &mut Request) -> Result<()> {
                request
                    .headers_mut()
                    .insert("x-amz-late", http::HeaderValue::from_static("1"));
                Ok(())
            }
        }

        let mut pipeline = gcs_pipeline("tok1");
        pipeline.handlers.sign.push_back("late-decoration", Arc::new(AddAmzHeader));
        let transport = RecordingTransport::default();
        pipeline.execute(put_request(), &transport).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers()["x-goog-late"], "1");
    }

    #[test]
    fn handler_list_ordering_operations() {
        let mut list: HandlerList<dyn RequestHandler> = HandlerList::default();
        list.push_back("b", Arc::new(ContentLength));
        list.push_front("a", Arc::new(ContentLength));
        list.push_back("c", Arc::new(ContentLength));
        assert_eq!(list.names(), vec!["a", "b", "c"]);

        assert!(list.remove("b"));
        assert!(!list.remove("missing"));
        assert_eq!(list.names(), vec!["a", "c"]);

        list.clear();
        assert!(list.is_empty());
    }
}
