//! S3-vocabulary storage operations routed through a [`Pipeline`].
//!
//! The client speaks path-style S3: `x-amz-acl`, `x-amz-meta-*`, ListBuckets
//! XML. Whatever the pipeline does to the wire format stays invisible here.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, ETAG};
use http::Method;
use regex::Regex;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::transport::{Request, Response, Transport};

pub const ACL_HEADER: &str = "x-amz-acl";
pub const META_PREFIX: &str = "x-amz-meta-";

#[derive(Debug, Clone, Default)]
pub struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub acl: Option<String>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListBucketsOutput {
    pub buckets: Vec<String>,
}

/// What the caller sees of an object response, in S3 terms.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectOutput {
    pub status: u16,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub headers: HeaderMap,
    #[serde(skip)]
    pub body: Bytes,
}

impl ObjectOutput {
    fn from_response(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        let header_str = |name: HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            status: parts.status.as_u16(),
            etag: header_str(ETAG),
            content_type: header_str(CONTENT_TYPE),
            metadata: user_metadata(&parts.headers),
            headers: parts.headers.clone(),
            body,
        }
    }
}

/// User metadata from `x-amz-meta-*` headers, keyed without the prefix.
pub fn user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

fn bucket_names(xml: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"<Bucket>\s*<Name>([^<]+)</Name>") else {
        return Vec::new();
    };
    re.captures_iter(xml).map(|c| c[1].to_string()).collect()
}

pub struct StorageClient {
    endpoint: Url,
    pipeline: Pipeline,
    transport: Arc<dyn Transport>,
}

impl StorageClient {
    pub fn new(config: &BridgeConfig, pipeline: Pipeline, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            pipeline,
            transport,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn url(&self, bucket: Option<&str>, key: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidRequest(format!("endpoint {} cannot be a base", self.endpoint)))?;
            segments.pop_if_empty();
            if let Some(bucket) = bucket {
                segments.push(bucket);
            }
            if let Some(key) = key {
                segments.extend(key.trim_start_matches('/').split('/'));
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, body: Bytes) -> Result<Request> {
        Ok(http::Request::builder()
            .method(method)
            .uri(url.as_str())
            .body(body)?)
    }

    /// Runs an arbitrary request through the pipeline. Non-2xx responses are errors.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let response = self.pipeline.execute(request, self.transport.as_ref()).await?;
        if !response.status().is_success() {
            return Err(Error::Backend {
                status: response.status().as_u16(),
                body: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        Ok(response)
    }

    pub async fn list_buckets(&self) -> Result<ListBucketsOutput> {
        let request = self.request(Method::GET, self.url(None, None)?, Bytes::new())?;
        let response = self.send(request).await?;
        let buckets = bucket_names(&String::from_utf8_lossy(response.body()));
        info!(count = buckets.len(), "listed buckets");
        Ok(ListBucketsOutput { buckets })
    }

    pub async fn put_object(&self, input: PutObjectInput) -> Result<ObjectOutput> {
        let url = self.url(Some(&input.bucket), Some(&input.key))?;
        let mut request = self.request(Method::PUT, url, input.body)?;
        let headers = request.headers_mut();
        if let Some(acl) = &input.acl {
            headers.insert(ACL_HEADER, HeaderValue::from_str(acl)?);
        }
        if let Some(content_type) = &input.content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type)?);
        }
        for (key, value) in &input.metadata {
            let name = HeaderName::from_bytes(format!("{}{}", META_PREFIX, key).as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("metadata key {:?}: {}", key, e)))?;
            headers.insert(name, HeaderValue::from_str(value)?);
        }

        let output = ObjectOutput::from_response(self.send(request).await?);
        info!(bucket = %input.bucket, key = %input.key, etag = ?output.etag, "put object");
        Ok(output)
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectOutput> {
        self.object_request(Method::GET, bucket, key).await
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectOutput> {
        self.object_request(Method::HEAD, bucket, key).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<ObjectOutput> {
        self.object_request(Method::DELETE, bucket, key).await
    }

    async fn object_request(&self, method: Method, bucket: &str, key: &str) -> Result<ObjectOutput> {
        let request = self.request(method, self.url(Some(bucket), Some(key))?, Bytes::new())?;
        Ok(ObjectOutput::from_response(self.send(request).await?))
    }
}
