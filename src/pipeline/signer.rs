use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::credentials::{system_clock, Clock, CredentialCache};
use crate::error::{AuthError, Error, Result};
use crate::transport::Request;

pub const PROJECT_ID_HEADER: &str = "x-goog-project-id";
pub const AMZ_DATE_HEADER: &str = "x-amz-date";
pub const AMZ_CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
pub const BEARER_PREFIX: &str = "Bearer ";

const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGV4_SERVICE: &str = "s3";

type HmacSha256 = Hmac<Sha256>;

/// Strategy that authenticates a request just before it is sent.
///
/// Chosen when the pipeline is built; exactly one signer sits in the sign phase.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, request: &mut Request) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Presents a cached OAuth bearer token instead of a request signature.
#[derive(Debug, Clone)]
pub struct BearerSigner {
    cache: CredentialCache,
    backend_identity: Option<HeaderValue>,
    identity_raw: String,
}

impl BearerSigner {
    pub const NAME: &'static str = "gcp-oauth2-signer";

    pub fn new(cache: CredentialCache, backend_identity: impl Into<String>) -> Self {
        let identity_raw = backend_identity.into();
        let backend_identity = HeaderValue::from_str(&identity_raw).ok();
        Self {
            cache,
            backend_identity,
            identity_raw,
        }
    }
}

#[async_trait]
impl Signer for BearerSigner {
    async fn sign(&self, request: &mut Request) -> Result<()> {
        let credential = self.cache.current().await?;

        let identity = self.backend_identity.clone().ok_or_else(|| {
            Error::InvalidRequest(format!(
                "backend identity {:?} is not a valid header value",
                self.identity_raw
            ))
        })?;
        let mut bearer = HeaderValue::from_str(&format!("{}{}", BEARER_PREFIX, credential.access_token))
            .map_err(|_| AuthError::MalformedResponse("access token is not a valid header value".into()))?;
        bearer.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(PROJECT_ID_HEADER, identity);

        debug!(
            method = %request.method(),
            uri = %request.uri(),
            expires_at = ?credential.expiry,
            "attached bearer credential"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Static access key pair for native S3 signing.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    secret_access_key: String,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// AWS Signature Version 4 for the `s3` service.
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    clock: Clock,
}

impl fmt::Debug for SigV4Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigV4Signer")
            .field("credentials", &self.credentials)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl SigV4Signer {
    pub const NAME: &'static str = "v4-signer";

    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn scope(&self, date: &str) -> String {
        format!("{}/{}/{}/aws4_request", date, self.region, SIGV4_SERVICE)
    }

    /// Signing key derived from the secret, date, region and service.
    pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
        let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    /// Canonical request and signed header list for `request`.
    fn canonical_request(request: &Request, payload_hash: &str) -> (String, String) {
        let mut canonical_headers: BTreeMap<String, String> = BTreeMap::new();
        if let Some(authority) = request.uri().authority() {
            canonical_headers.insert("host".into(), authority.as_str().to_string());
        }
        for (name, value) in request.headers() {
            let name = name.as_str();
            if name == "host" || name == "content-type" || name == "content-md5" || name.starts_with("x-amz-") {
                let value = String::from_utf8_lossy(value.as_bytes());
                let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
                canonical_headers
                    .entry(name.to_string())
                    .and_modify(|existing| {
                        existing.push(',');
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
        }

        let signed_headers = canonical_headers.keys().cloned().collect::<Vec<_>>().join(";");
        let header_block: String = canonical_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let path = match request.uri().path() {
            "" => "/",
            p => p,
        };
        let mut query: Vec<(&str, &str)> = request
            .uri()
            .query()
            .unwrap_or("")
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();
        query.sort();
        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method(),
            path,
            query,
            header_block,
            signed_headers,
            payload_hash
        );
        (canonical, signed_headers)
    }

    fn authorization(&self, request: &Request, now: DateTime<Utc>, payload_hash: &str) -> Result<String> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = self.scope(&date);

        let (canonical, signed_headers) = Self::canonical_request(request, payload_hash);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            SIGV4_ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );

        let key = Self::signing_key(
            &self.credentials.secret_access_key,
            &date,
            &self.region,
            SIGV4_SERVICE,
        )?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            SIGV4_ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
        ))
    }
}

#[async_trait]
impl Signer for SigV4Signer {
    async fn sign(&self, request: &mut Request) -> Result<()> {
        let now = (self.clock)();
        let payload_hash = hex::encode(Sha256::digest(request.body()));

        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.insert(
            HeaderName::from_static(AMZ_DATE_HEADER),
            HeaderValue::from_str(&now.format("%Y%m%dT%H%M%SZ").to_string())?,
        );
        headers.insert(
            HeaderName::from_static(AMZ_CONTENT_SHA256_HEADER),
            HeaderValue::from_str(&payload_hash)?,
        );

        let authorization = self.authorization(request, now, &payload_hash)?;
        let mut value = HeaderValue::from_str(&authorization)?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::InvalidRequest(format!("signing key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, StaticTokenSupplier, TokenSupplier};
    use bytes::Bytes;
    use std::sync::Arc;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn request_with_auth(auth: &str) -> Request {
        http::Request::builder()
            .method("GET")
            .uri("https://storage.googleapis.com/bucket/key")
            .header(AUTHORIZATION, auth)
            .body(Bytes::new())
            .unwrap()
    }

    fn bearer(token: &str) -> BearerSigner {
        let cache = CredentialCache::new(Arc::new(StaticTokenSupplier::new(token)));
        BearerSigner::new(cache, "my-project")
    }

    #[tokio::test]
    async fn bearer_replaces_existing_authorization() {
        let mut req = request_with_auth("AWS4-HMAC-SHA256 Credential=old");
        bearer("tok1").sign(&mut req).await.unwrap();

        let values: Vec<_> = req.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values, vec!["Bearer tok1"]);
        assert_eq!(req.headers()[PROJECT_ID_HEADER], "my-project");
    }

    #[tokio::test]
    async fn bearer_surfaces_credential_failure() {
        struct Down;

        #[async_trait]
        impl TokenSupplier for Down {
            async fn fetch(&self) -> std::result::Result<Credential, AuthError> {
                Err(AuthError::Unavailable("down".into()))
            }

            fn name(&self) -> &'static str {
                "down"
            }
        }

        let signer = BearerSigner::new(CredentialCache::new(Arc::new(Down)), "p");
        let mut req = request_with_auth("previous");
        let err = signer.sign(&mut req).await.unwrap_err();
        assert!(err.is_credential_error());
        assert_eq!(req.headers()[AUTHORIZATION], "previous");
    }

    #[tokio::test]
    async fn bearer_rejects_identity_that_cannot_be_a_header() {
        let cache = CredentialCache::new(Arc::new(StaticTokenSupplier::new("tok")));
        let signer = BearerSigner::new(cache, "bad\nproject");
        let mut req = request_with_auth("x");
        assert!(matches!(
            signer.sign(&mut req).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn bearer_treats_unusable_token_as_credential_failure() {
        let mut req = request_with_auth("previous");
        let err = bearer("bad\ntoken").sign(&mut req).await.unwrap_err();
        assert!(err.is_credential_error());
        assert!(matches!(err, Error::Auth(AuthError::MalformedResponse(_))));
        assert_eq!(req.headers()[AUTHORIZATION], "previous");
        assert!(req.headers().get(PROJECT_ID_HEADER).is_none());
    }

    #[test]
    fn hmac_accepts_empty_and_oversized_keys() {
        assert_eq!(hmac_sha256(b"", b"data").unwrap().len(), 32);
        assert_eq!(hmac_sha256(&[7u8; 200], b"data").unwrap().len(), 32);
    }

    #[test]
    fn signing_key_matches_published_derivation() {
        let key = SigV4Signer::signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[tokio::test]
    async fn sigv4_sets_date_hash_and_authorization() {
        let fixed = DateTime::parse_from_rfc3339("2013-05-24T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let signer = SigV4Signer::new(AwsCredentials::new("AKIDEXAMPLE", "secret"), "us-east-1")
            .with_clock(Arc::new(move || fixed));

        let mut req = http::Request::builder()
            .method("GET")
            .uri("https://examplebucket.s3.amazonaws.com/test.txt?b=2&a=1")
            .header("x-amz-acl", "private")
            .header("range", "bytes=0-9")
            .body(Bytes::new())
            .unwrap();
        signer.sign(&mut req).await.unwrap();

        let headers = req.headers();
        assert_eq!(headers[AMZ_DATE_HEADER], "20130524T000000Z");
        assert_eq!(headers[AMZ_CONTENT_SHA256_HEADER], EMPTY_SHA256);

        let auth = headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20130524/us-east-1/s3/aws4_request, "
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-acl;x-amz-content-sha256;x-amz-date,"));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_request_sorts_query_and_headers() {
        let req = http::Request::builder()
            .method("PUT")
            .uri("https://host.example/bucket/key?z=1&a=2")
            .header("x-amz-meta-b", "  two   words ")
            .header("x-amz-acl", "private")
            .body(Bytes::new())
            .unwrap();

        let (canonical, signed) = SigV4Signer::canonical_request(&req, EMPTY_SHA256);
        assert_eq!(signed, "host;x-amz-acl;x-amz-meta-b");
        let lines: Vec<_> = canonical.lines().collect();
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[1], "/bucket/key");
        assert_eq!(lines[2], "a=2&z=1");
        assert_eq!(lines[3], "host:host.example");
        assert_eq!(lines[5], "x-amz-meta-b:two words");
        assert_eq!(lines.last().copied(), Some(EMPTY_SHA256));
    }
}
