use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_LENGTH, USER_AGENT};
use http::Method;
use tracing::trace;
use uuid::Uuid;

use super::{RequestHandler, ResponseHandler};
use crate::error::Result;
use crate::transport::{Request, Response};
use crate::translate::{NamespaceRule, INBOUND, OUTBOUND};

pub const INVOCATION_ID_HEADER: &str = "amz-sdk-invocation-id";

/// Sets `user-agent` unless the caller already chose one.
#[derive(Debug, Clone)]
pub struct UserAgent {
    value: HeaderValue,
}

impl UserAgent {
    pub const NAME: &'static str = "user-agent";
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            value: HeaderValue::from_static(concat!("s3gcs/", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[async_trait]
impl RequestHandler for UserAgent {
    async fn handle(&self, request: &mut Request) -> Result<()> {
        request
            .headers_mut()
            .entry(USER_AGENT)
            .or_insert_with(|| self.value.clone());
        Ok(())
    }
}

/// Tags each request with a fresh invocation id.
#[derive(Debug, Clone, Copy)]
pub struct InvocationId;

impl InvocationId {
    pub const NAME: &'static str = "invocation-id";
}

#[async_trait]
impl RequestHandler for InvocationId {
    async fn handle(&self, request: &mut Request) -> Result<()> {
        let id = HeaderValue::from_str(&Uuid::new_v4().to_string())?;
        request.headers_mut().insert(INVOCATION_ID_HEADER, id);
        Ok(())
    }
}

/// Sets `content-length` from the buffered body.
///
/// Bodiless GET/HEAD/DELETE requests are left without the header.
#[derive(Debug, Clone, Copy)]
pub struct ContentLength;

impl ContentLength {
    pub const NAME: &'static str = "content-length";
}

#[async_trait]
impl RequestHandler for ContentLength {
    async fn handle(&self, request: &mut Request) -> Result<()> {
        let len = request.body().len();
        let bodiless = matches!(*request.method(), Method::GET | Method::HEAD | Method::DELETE);
        if len == 0 && bodiless {
            request.headers_mut().remove(CONTENT_LENGTH);
        } else {
            request.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(())
    }
}

/// Request-side header namespace rewrite.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceRewrite {
    rule: NamespaceRule,
}

impl NamespaceRewrite {
    pub const NAME: &'static str = "amz-to-goog-headers";

    pub fn outbound() -> Self {
        Self { rule: OUTBOUND }
    }
}

#[async_trait]
impl RequestHandler for NamespaceRewrite {
    async fn handle(&self, request: &mut Request) -> Result<()> {
        let moved = self.rule.apply(request.headers_mut());
        trace!(moved, source = self.rule.source, target = self.rule.target, "rewrote request headers");
        Ok(())
    }
}

/// Response-side header namespace rewrite.
#[derive(Debug, Clone, Copy)]
pub struct ResponseNamespaceRewrite {
    rule: NamespaceRule,
}

impl ResponseNamespaceRewrite {
    pub const NAME: &'static str = "goog-to-amz-headers";

    pub fn inbound() -> Self {
        Self { rule: INBOUND }
    }
}

impl ResponseHandler for ResponseNamespaceRewrite {
    fn handle(&self, response: &mut Response) {
        let moved = self.rule.apply(response.headers_mut());
        trace!(moved, source = self.rule.source, target = self.rule.target, "rewrote response headers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(method: Method, body: &'static [u8]) -> Request {
        http::Request::builder()
            .method(method)
            .uri("https://storage.googleapis.com/b/k")
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[tokio::test]
    async fn content_length_matches_body() {
        let mut req = request(Method::PUT, b"lorem ipsum");
        ContentLength.handle(&mut req).await.unwrap();
        assert_eq!(req.headers()[CONTENT_LENGTH], "11");
    }

    #[tokio::test]
    async fn empty_put_still_declares_zero_length() {
        let mut req = request(Method::PUT, b"");
        ContentLength.handle(&mut req).await.unwrap();
        assert_eq!(req.headers()[CONTENT_LENGTH], "0");
    }

    #[tokio::test]
    async fn bodiless_get_has_no_content_length() {
        let mut req = request(Method::GET, b"");
        ContentLength.handle(&mut req).await.unwrap();
        assert!(req.headers().get(CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn user_agent_keeps_caller_value() {
        let mut req = request(Method::GET, b"");
        req.headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("custom/1.0"));
        UserAgent::default().handle(&mut req).await.unwrap();
        assert_eq!(req.headers()[USER_AGENT], "custom/1.0");

        let mut req = request(Method::GET, b"");
        UserAgent::default().handle(&mut req).await.unwrap();
        assert!(req.headers()[USER_AGENT].to_str().unwrap().starts_with("s3gcs/"));
    }

    #[tokio::test]
    async fn invocation_id_differs_per_request() {
        let mut a = request(Method::GET, b"");
        let mut b = request(Method::GET, b"");
        InvocationId.handle(&mut a).await.unwrap();
        InvocationId.handle(&mut b).await.unwrap();
        assert_ne!(a.headers()[INVOCATION_ID_HEADER], b.headers()[INVOCATION_ID_HEADER]);
    }

    #[test]
    fn response_rewrite_restores_amz_names() {
        let mut resp = http::Response::builder()
            .header("x-goog-hash", "crc32c=AAAAAA==")
            .header("x-goog-stored-content-length", "11")
            .body(Bytes::new())
            .unwrap();
        ResponseNamespaceRewrite::inbound().handle(&mut resp);
        assert_eq!(resp.headers()["x-amz-hash"], "crc32c=AAAAAA==");
        assert_eq!(resp.headers()["x-amz-stored-content-length"], "11");
    }
}
