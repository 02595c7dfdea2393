//! In-process mock context
//!
//! Answers path-style S3 requests from memory, synchronously and
//! deterministically. Covers the calls the async client makes:
//!
//! | Request | Operation |
//! |---------|-----------|
//! | `GET /` | ListBuckets |
//! | `PUT /{bucket}` | CreateBucket |
//! | `PUT /{bucket}?versioning` | PutBucketVersioning |
//! | `GET /{bucket}?versioning` | GetBucketVersioning |
//! | `PUT /{bucket}?policy` | PutBucketPolicy |
//! | `GET /{bucket}?list-type=2` | ListObjectsV2 (prefix only) |
//! | `PUT /{bucket}/{key}` | PutObject, denied with 403 by a bucket policy |
//! | `GET /{bucket}/{key}` | GetObject, honoring `Range` |
//! | `HEAD /{bucket}/{key}` | HeadObject |
//! | `DELETE /{bucket}/{key}` | DeleteObject |

use super::adapter::MockResponse;
use super::transport::TransportRequest;
use super::xml::{
    self, BucketEntry, BucketList, ListAllMyBucketsResult, ListBucketResult, ListEntry,
    S3ErrorBody, VersioningConfiguration,
};
use crate::config::BucketSpec;
use crate::metrics;
use crate::s3::PolicyDocument;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::{Method, StatusCode};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

const SSE_HEADER: &str = "x-amz-server-side-encryption";

/// A request seen by the context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    etag: String,
    content_type: Option<String>,
    server_side_encryption: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct Bucket {
    created: DateTime<Utc>,
    versioning: Option<String>,
    policy: Option<PolicyDocument>,
    objects: BTreeMap<String, StoredObject>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            created: Utc::now(),
            versioning: None,
            policy: None,
            objects: BTreeMap::new(),
        }
    }
}

/// In-memory mock of the S3 API
#[derive(Debug, Default)]
pub struct MockContext {
    buckets: Mutex<BTreeMap<String, Bucket>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with `names` already created
    pub fn with_buckets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let context = Self::new();
        for name in names {
            context.create_bucket(name);
        }
        context
    }

    /// A context provisioned like an emulator would be from `specs`
    pub fn with_specs(specs: &[BucketSpec]) -> Self {
        let context = Self::new();
        for spec in specs {
            context.create_bucket_with(spec);
        }
        context
    }

    /// Create a bucket directly; false if it already exists
    pub fn create_bucket(&self, name: impl Into<String>) -> bool {
        self.create_bucket_with(&BucketSpec::new(name))
    }

    /// Create a bucket with the versioning and policy `spec` asks for; false
    /// if it already exists
    pub fn create_bucket_with(&self, spec: &BucketSpec) -> bool {
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(&spec.name) {
            return false;
        }
        let mut bucket = Bucket::new();
        if spec.versioned {
            bucket.versioning = Some("Enabled".to_string());
        }
        if spec.deny_unencrypted_uploads {
            bucket.policy = Some(PolicyDocument::deny_unencrypted_uploads(&spec.name));
        }
        buckets.insert(spec.name.clone(), bucket);
        true
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.lock().keys().cloned().collect()
    }

    /// Stored bytes of an object, bypassing the request path
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.body.clone())
    }

    /// Requests handled so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Answer one request
    pub fn handle(&self, request: &TransportRequest) -> MockResponse {
        let response = self
            .route(request)
            .with_header("x-amz-request-id", uuid::Uuid::new_v4().to_string());

        metrics::record_mock_request(request.method.as_str(), response.status.as_u16());
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            "Mock context answered"
        );
        self.requests.lock().push(RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            status: response.status,
        });
        response
    }

    fn route(&self, request: &TransportRequest) -> MockResponse {
        let decoded = percent_decode_str(&request.path).decode_utf8_lossy();
        let trimmed = decoded.trim_start_matches('/');
        let (bucket, key) = match trimmed.split_once('/') {
            Some((bucket, key)) if !key.is_empty() => (bucket, Some(key)),
            Some((bucket, _)) => (bucket, None),
            None => (trimmed, None),
        };

        let versioning = request.query_param("versioning").is_some();
        let policy = request.query_param("policy").is_some();

        match (&request.method, bucket, key) {
            (&Method::GET, "", None) => self.list_buckets(),
            (&Method::PUT, bucket, None) if versioning => self.put_versioning(bucket, request),
            (&Method::GET, bucket, None) if versioning => self.get_versioning(bucket),
            (&Method::PUT, bucket, None) if policy => self.put_policy(bucket, request),
            (&Method::PUT, bucket, None) => self.put_bucket(bucket),
            (&Method::GET, bucket, None) => self.list_objects(bucket, request),
            (&Method::PUT, bucket, Some(key)) => self.put_object(bucket, key, request),
            (&Method::GET, bucket, Some(key)) => self.get_object(bucket, key, request, true),
            (&Method::HEAD, bucket, Some(key)) => self.get_object(bucket, key, request, false),
            (&Method::DELETE, bucket, Some(key)) => self.delete_object(bucket, key),
            _ => MockResponse::error(
                StatusCode::METHOD_NOT_ALLOWED,
                S3ErrorBody::new(
                    "MethodNotAllowed",
                    "The specified method is not allowed against this resource.",
                )
                .with_resource(request.path.clone()),
            ),
        }
    }

    fn list_buckets(&self) -> MockResponse {
        let buckets = self.buckets.lock();
        let result = ListAllMyBucketsResult {
            buckets: BucketList {
                bucket: buckets
                    .iter()
                    .map(|(name, bucket)| BucketEntry {
                        name: name.clone(),
                        creation_date: iso_timestamp(&bucket.created),
                    })
                    .collect(),
            },
        };
        xml_ok(&result)
    }

    fn put_bucket(&self, bucket: &str) -> MockResponse {
        if self.create_bucket(bucket) {
            MockResponse::new(StatusCode::OK).with_header("Location", format!("/{}", bucket))
        } else {
            MockResponse::error(
                StatusCode::CONFLICT,
                S3ErrorBody::new(
                    "BucketAlreadyExists",
                    "The requested bucket name is not available.",
                )
                .with_resource(format!("/{}", bucket)),
            )
        }
    }

    fn put_versioning(&self, bucket: &str, request: &TransportRequest) -> MockResponse {
        let mut buckets = self.buckets.lock();
        let Some(stored) = buckets.get_mut(bucket) else {
            return no_such_bucket(bucket);
        };
        let parsed = std::str::from_utf8(&request.body)
            .ok()
            .and_then(|text| quick_xml::de::from_str::<VersioningConfiguration>(text).ok());
        match parsed {
            Some(configuration) => {
                stored.versioning = configuration.status;
                MockResponse::new(StatusCode::OK)
            }
            None => malformed_xml(),
        }
    }

    fn get_versioning(&self, bucket: &str) -> MockResponse {
        let buckets = self.buckets.lock();
        let Some(stored) = buckets.get(bucket) else {
            return no_such_bucket(bucket);
        };
        xml_ok(&VersioningConfiguration {
            status: stored.versioning.clone(),
        })
    }

    fn put_policy(&self, bucket: &str, request: &TransportRequest) -> MockResponse {
        let mut buckets = self.buckets.lock();
        let Some(stored) = buckets.get_mut(bucket) else {
            return no_such_bucket(bucket);
        };
        match serde_json::from_slice::<PolicyDocument>(&request.body) {
            Ok(policy) => {
                stored.policy = Some(policy);
                MockResponse::new(StatusCode::NO_CONTENT)
            }
            Err(e) => MockResponse::error(
                StatusCode::BAD_REQUEST,
                S3ErrorBody::new("MalformedPolicy", e.to_string()),
            ),
        }
    }

    fn list_objects(&self, bucket: &str, request: &TransportRequest) -> MockResponse {
        let buckets = self.buckets.lock();
        let Some(stored) = buckets.get(bucket) else {
            return no_such_bucket(bucket);
        };
        let prefix = request.query_param("prefix").unwrap_or_default();

        let contents: Vec<ListEntry> = stored
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ListEntry {
                key: key.clone(),
                size: object.body.len() as u64,
                etag: object.etag.clone(),
                last_modified: iso_timestamp(&object.last_modified),
            })
            .collect();

        xml_ok(&ListBucketResult {
            name: bucket.to_string(),
            prefix: prefix.to_string(),
            key_count: contents.len(),
            is_truncated: false,
            contents,
        })
    }

    fn put_object(&self, bucket: &str, key: &str, request: &TransportRequest) -> MockResponse {
        let mut buckets = self.buckets.lock();
        let Some(stored) = buckets.get_mut(bucket) else {
            return no_such_bucket(bucket);
        };

        let sse = request.header(SSE_HEADER);
        if let Some(policy) = &stored.policy {
            if policy.denies_put_object(bucket, key, sse) {
                return MockResponse::error(
                    StatusCode::FORBIDDEN,
                    S3ErrorBody::new("AccessDenied", "Access Denied")
                        .with_resource(format!("/{}/{}", bucket, key)),
                );
            }
        }

        let object = StoredObject {
            etag: etag_for(&request.body),
            body: request.body.clone(),
            content_type: request.header("content-type").map(str::to_string),
            server_side_encryption: sse.map(str::to_string),
            last_modified: Utc::now(),
        };

        let mut response = MockResponse::new(StatusCode::OK).with_header("ETag", object.etag.clone());
        if let Some(sse) = &object.server_side_encryption {
            response = response.with_header(SSE_HEADER, sse.clone());
        }
        stored.objects.insert(key.to_string(), object);
        response
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        request: &TransportRequest,
        with_body: bool,
    ) -> MockResponse {
        let buckets = self.buckets.lock();
        let Some(stored) = buckets.get(bucket) else {
            return if with_body {
                no_such_bucket(bucket)
            } else {
                MockResponse::new(StatusCode::NOT_FOUND)
            };
        };
        let Some(object) = stored.objects.get(key) else {
            return if with_body {
                MockResponse::error(
                    StatusCode::NOT_FOUND,
                    S3ErrorBody::new("NoSuchKey", "The specified key does not exist.")
                        .with_resource(format!("/{}/{}", bucket, key)),
                )
            } else {
                MockResponse::new(StatusCode::NOT_FOUND)
            };
        };

        let total = object.body.len() as u64;
        let range = match request.header("range") {
            Some(header) => match parse_range(header, total) {
                Some(range) => Some(range),
                None => {
                    return MockResponse::error(
                        StatusCode::RANGE_NOT_SATISFIABLE,
                        S3ErrorBody::new(
                            "InvalidRange",
                            "The requested range is not satisfiable",
                        ),
                    )
                    .with_header("Content-Range", format!("bytes */{}", total));
                }
            },
            None => None,
        };

        let (status, body) = match range {
            Some((start, end)) => (
                StatusCode::PARTIAL_CONTENT,
                object.body.slice(start as usize..=end as usize),
            ),
            None => (StatusCode::OK, object.body.clone()),
        };

        let mut response = MockResponse::new(status)
            .with_header("Content-Length", body.len().to_string())
            .with_header("ETag", object.etag.clone())
            .with_header("Last-Modified", http_date(&object.last_modified))
            .with_header("Accept-Ranges", "bytes");
        if let Some(content_type) = &object.content_type {
            response = response.with_header("Content-Type", content_type.clone());
        }
        if let Some(sse) = &object.server_side_encryption {
            response = response.with_header(SSE_HEADER, sse.clone());
        }
        if let Some((start, end)) = range {
            response =
                response.with_header("Content-Range", format!("bytes {}-{}/{}", start, end, total));
        }
        if with_body {
            response = response.with_body(body);
        }
        response
    }

    fn delete_object(&self, bucket: &str, key: &str) -> MockResponse {
        let mut buckets = self.buckets.lock();
        let Some(stored) = buckets.get_mut(bucket) else {
            return no_such_bucket(bucket);
        };
        // Deleting a missing key still succeeds
        stored.objects.remove(key);
        MockResponse::new(StatusCode::NO_CONTENT)
    }
}

fn no_such_bucket(bucket: &str) -> MockResponse {
    MockResponse::error(
        StatusCode::NOT_FOUND,
        S3ErrorBody::new("NoSuchBucket", "The specified bucket does not exist")
            .with_resource(format!("/{}", bucket)),
    )
}

fn malformed_xml() -> MockResponse {
    MockResponse::error(
        StatusCode::BAD_REQUEST,
        S3ErrorBody::new(
            "MalformedXML",
            "The XML you provided was not well-formed or did not validate against our published schema",
        ),
    )
}

fn xml_ok<T: serde::Serialize>(value: &T) -> MockResponse {
    match xml::to_document(value) {
        Ok(document) => MockResponse::new(StatusCode::OK)
            .with_header("Content-Type", "application/xml")
            .with_body(document),
        Err(e) => MockResponse::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            S3ErrorBody::new("InternalError", e.to_string()),
        ),
    }
}

/// Deterministic quoted ETag for a body
fn etag_for(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    let high = hasher.finish();
    body.len().hash(&mut hasher);
    format!("\"{:016x}{:016x}\"", high, hasher.finish())
}

fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a single `bytes=` range against an object of `total` bytes.
///
/// Returns the inclusive `(start, end)` pair, clamped to the object, or `None`
/// when the range cannot be satisfied.
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if total == 0 {
        return None;
    }

    match (start.trim(), end.trim()) {
        ("", suffix) => {
            let len: u64 = suffix.parse().ok()?;
            if len == 0 {
                return None;
            }
            Some((total.saturating_sub(len), total - 1))
        }
        (start, "") => {
            let start: u64 = start.parse().ok()?;
            (start < total).then_some((start, total - 1))
        }
        (start, end) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            (start <= end && start < total).then_some((start, end.min(total - 1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(context: &MockContext, bucket: &str, key: &str, body: &'static str) -> MockResponse {
        context.handle(
            &TransportRequest::new(Method::PUT, bucket, Some(key))
                .with_body(Bytes::from_static(body.as_bytes())),
        )
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-3", 10), Some((0, 3)));
        assert_eq!(parse_range("bytes=4-", 10), Some((4, 9)));
        assert_eq!(parse_range("bytes=-3", 10), Some((7, 9)));
        assert_eq!(parse_range("bytes=-30", 10), Some((0, 9)));
        assert_eq!(parse_range("bytes=5-100", 10), Some((5, 9)));
        assert_eq!(parse_range("bytes=10-", 10), None);
        assert_eq!(parse_range("bytes=5-2", 10), None);
        assert_eq!(parse_range("items=0-1", 10), None);
        assert_eq!(parse_range("bytes=0-1", 0), None);
    }

    #[test]
    fn test_create_bucket_twice_conflicts() {
        let context = MockContext::new();
        let first = context.handle(&TransportRequest::new(Method::PUT, "test", None));
        let second = context.handle(&TransportRequest::new(Method::PUT, "test", None));

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::CONFLICT);
        assert_eq!(context.bucket_names(), vec!["test"]);
    }

    #[test]
    fn test_put_then_ranged_get() {
        let context = MockContext::with_buckets(["test"]);
        let put_response = put(&context, "test", "data.bin", "0123456789");
        assert_eq!(put_response.status, StatusCode::OK);

        let response = context.handle(
            &TransportRequest::new(Method::GET, "test", Some("data.bin"))
                .with_header("Range", "bytes=2-5"),
        );
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body, Bytes::from("2345"));
        assert_eq!(response.header("content-range"), Some("bytes 2-5/10"));
        assert_eq!(response.header("etag"), put_response.header("etag"));
    }

    #[test]
    fn test_unsatisfiable_range() {
        let context = MockContext::with_buckets(["test"]);
        put(&context, "test", "k", "abc");
        let response = context.handle(
            &TransportRequest::new(Method::GET, "test", Some("k")).with_header("Range", "bytes=9-"),
        );
        assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.header("content-range"), Some("bytes */3"));
    }

    #[test]
    fn test_missing_bucket_and_key() {
        let context = MockContext::with_buckets(["test"]);

        let no_bucket = put(&context, "nope", "k", "x");
        assert_eq!(no_bucket.status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(&no_bucket.body).contains("NoSuchBucket"));

        let no_key = context.handle(&TransportRequest::new(Method::GET, "test", Some("k")));
        assert!(String::from_utf8_lossy(&no_key.body).contains("NoSuchKey"));

        let head = context.handle(&TransportRequest::new(Method::HEAD, "test", Some("k")));
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert!(head.body.is_empty());
    }

    #[test]
    fn test_encoded_keys_are_decoded() {
        let context = MockContext::with_buckets(["test"]);
        put(&context, "test", "dir/with space.txt", "x");
        assert_eq!(
            context.object("test", "dir/with space.txt"),
            Some(Bytes::from("x"))
        );
    }

    #[test]
    fn test_sse_header_is_echoed() {
        let context = MockContext::with_buckets(["test"]);
        let response = context.handle(
            &TransportRequest::new(Method::PUT, "test", Some("k"))
                .with_header("x-amz-server-side-encryption", "aws:kms"),
        );
        assert_eq!(response.header(SSE_HEADER), Some("aws:kms"));
    }

    #[test]
    fn test_requests_are_recorded() {
        let context = MockContext::with_buckets(["test"]);
        put(&context, "test", "k", "v");
        context.handle(&TransportRequest::new(Method::DELETE, "test", Some("k")));
        context.handle(&TransportRequest::new(Method::POST, "test", Some("k")));

        let statuses: Vec<_> = context.requests().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::NO_CONTENT,
                StatusCode::METHOD_NOT_ALLOWED
            ]
        );
        assert!(context.object("test", "k").is_none());
    }

    #[test]
    fn test_secure_spec_denies_unencrypted_put() {
        let context = MockContext::with_specs(&crate::s3::default_bucket_specs());

        let plain = put(&context, "test-secure", "k", "x");
        assert_eq!(plain.status, StatusCode::FORBIDDEN);
        assert!(String::from_utf8_lossy(&plain.body).contains("AccessDenied"));
        assert!(context.object("test-secure", "k").is_none());

        let encrypted = context.handle(
            &TransportRequest::new(Method::PUT, "test-secure", Some("k"))
                .with_header(SSE_HEADER, "aws:kms")
                .with_body(Bytes::from_static(b"x")),
        );
        assert_eq!(encrypted.status, StatusCode::OK);

        assert_eq!(put(&context, "test", "k", "x").status, StatusCode::OK);
    }

    #[test]
    fn test_versioning_round_trip() {
        let context = MockContext::with_specs(&crate::s3::default_bucket_specs());
        let get = |bucket: &str| {
            context.handle(
                &TransportRequest::new(Method::GET, bucket, None).with_query("versioning", ""),
            )
        };

        let versioned = get("test-versioned");
        assert_eq!(versioned.status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&versioned.body).contains("<Status>Enabled</Status>"));
        assert!(!String::from_utf8_lossy(&get("test").body).contains("Status"));

        let suspend = context.handle(
            &TransportRequest::new(Method::PUT, "test-versioned", None)
                .with_query("versioning", "")
                .with_body(Bytes::from_static(
                    b"<VersioningConfiguration><Status>Suspended</Status></VersioningConfiguration>",
                )),
        );
        assert_eq!(suspend.status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&get("test-versioned").body).contains("Suspended"));
    }

    #[test]
    fn test_policy_attached_by_request_is_enforced() {
        let context = MockContext::with_buckets(["locked"]);
        let attach = context.handle(
            &TransportRequest::new(Method::PUT, "locked", None)
                .with_query("policy", "")
                .with_body(Bytes::from(crate::s3::secure_bucket_policy("locked"))),
        );
        assert_eq!(attach.status, StatusCode::NO_CONTENT);
        assert_eq!(put(&context, "locked", "k", "x").status, StatusCode::FORBIDDEN);
    }
}
