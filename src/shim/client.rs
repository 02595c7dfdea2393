//! Asynchronous storage client
//!
//! A small path-style S3 client whose every call runs through
//! [`HttpTransport::send`] and then [`convert_response`]. Pointing it at an
//! in-process [`MockContext`] is a one-way switch: once intercepted, the
//! client stays intercepted for its lifetime.

use super::context::MockContext;
use super::transport::{HttpTransport, MockContextTransport, ReqwestTransport, TransportRequest};
use super::xml::{ListBucketResult, VersioningResponse};
use super::{convert_response, BodyReader, ResponseBody, ShimError, StructuredResponse};
use bytes::Bytes;
use futures::io::AsyncReadExt;
use hyper::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Interception state: `Unpatched -> Patched`, never back
enum Interception {
    Unpatched,
    Patched(Arc<MockContext>),
}

/// Object headers returned by `HeadObject`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub server_side_encryption: Option<String>,
}

impl ObjectMetadata {
    fn from_response(response: &StructuredResponse) -> Self {
        Self {
            content_length: response
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            content_type: response.header("content-type").map(str::to_string),
            etag: response.header("etag").map(str::to_string),
            last_modified: response.header("last-modified").map(str::to_string),
            server_side_encryption: response
                .header("x-amz-server-side-encryption")
                .map(str::to_string),
        }
    }
}

/// Optional headers for an upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Sent as `x-amz-server-side-encryption`, e.g. `aws:kms`
    pub server_side_encryption: Option<String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn server_side_encryption(mut self, algorithm: impl Into<String>) -> Self {
        self.server_side_encryption = Some(algorithm.into());
        self
    }

    /// Shorthand for `server_side_encryption("aws:kms")`
    pub fn kms(self) -> Self {
        self.server_side_encryption("aws:kms")
    }
}

/// One entry of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: String,
}

/// An object body still on the wire
pub struct ObjectStream {
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub etag: Option<String>,
    reader: BodyReader,
}

impl ObjectStream {
    fn from_response(response: StructuredResponse) -> Self {
        let content_length = response
            .header("content-length")
            .and_then(|v| v.parse().ok());
        let content_range = response.header("content-range").map(str::to_string);
        let etag = response.header("etag").map(str::to_string);
        let reader: BodyReader = match response.body {
            ResponseBody::Stream(reader) => reader,
            ResponseBody::Bytes(bytes) => Box::pin(futures::io::Cursor::new(bytes)),
        };
        Self {
            status: response.status,
            content_length,
            content_range,
            etag,
            reader,
        }
    }

    pub fn into_reader(self) -> BodyReader {
        self.reader
    }

    pub async fn read_to_end(mut self) -> Result<Bytes, ShimError> {
        let mut buffer = Vec::new();
        self.reader.read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Asynchronous S3 client
pub struct AsyncStorageClient {
    transport: Arc<dyn HttpTransport>,
    interception: Interception,
}

impl AsyncStorageClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            interception: Interception::Unpatched,
        }
    }

    /// Client talking to a live endpoint over the network
    pub fn connect(endpoint: &str) -> Result<Self, ShimError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(endpoint)?)))
    }

    /// Client answered by `context` from the start
    pub fn intercepted(context: Arc<MockContext>) -> Self {
        Self {
            transport: Arc::new(MockContextTransport::new(context.clone())),
            interception: Interception::Patched(context),
        }
    }

    /// Route every subsequent call into `context`.
    ///
    /// Installing the same context again changes nothing. A different context
    /// is refused with [`ShimError::AlreadyIntercepted`].
    pub fn intercept(&mut self, context: Arc<MockContext>) -> Result<(), ShimError> {
        match &self.interception {
            Interception::Patched(current) if Arc::ptr_eq(current, &context) => {
                tracing::debug!("Interception already installed");
                Ok(())
            }
            Interception::Patched(_) => Err(ShimError::AlreadyIntercepted),
            Interception::Unpatched => {
                self.transport = Arc::new(MockContextTransport::new(context.clone()));
                self.interception = Interception::Patched(context);
                tracing::debug!("Interception installed");
                Ok(())
            }
        }
    }

    pub fn is_intercepted(&self) -> bool {
        matches!(self.interception, Interception::Patched(_))
    }

    /// The installed mock context, if any
    pub fn context(&self) -> Option<&Arc<MockContext>> {
        match &self.interception {
            Interception::Patched(context) => Some(context),
            Interception::Unpatched => None,
        }
    }

    async fn call(
        &self,
        request: TransportRequest,
        streaming: bool,
    ) -> Result<StructuredResponse, ShimError> {
        let response = self.transport.send(request).await?;
        convert_response(response, streaming)
            .await?
            .error_for_status()
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), ShimError> {
        self.call(TransportRequest::new(Method::PUT, bucket, None), false)
            .await?;
        Ok(())
    }

    /// Upload an object, returning its ETag
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<Option<String>, ShimError> {
        let options = PutOptions {
            content_type: content_type.map(str::to_string),
            ..PutOptions::default()
        };
        self.put_object_with(bucket, key, body, &options).await
    }

    /// Upload an object with explicit headers, returning its ETag
    #[tracing::instrument(skip(self, body), fields(size = body.len()), err)]
    pub async fn put_object_with(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> Result<Option<String>, ShimError> {
        let mut request = TransportRequest::new(Method::PUT, bucket, Some(key))
            .with_header("Content-Length", body.len().to_string())
            .with_body(body);
        if let Some(content_type) = &options.content_type {
            request = request.with_header("Content-Type", content_type.as_str());
        }
        if let Some(sse) = &options.server_side_encryption {
            request = request.with_header("x-amz-server-side-encryption", sse.as_str());
        }
        let response = self.call(request, false).await?;
        Ok(response.header("etag").map(str::to_string))
    }

    /// Versioning status of a bucket (`Enabled`, `Suspended`), or `None` if
    /// versioning was never configured
    #[tracing::instrument(skip(self), err)]
    pub async fn get_bucket_versioning(&self, bucket: &str) -> Result<Option<String>, ShimError> {
        let request =
            TransportRequest::new(Method::GET, bucket, None).with_query("versioning", "");
        let body = self.call(request, false).await?.into_bytes().await?;
        let text = std::str::from_utf8(&body)
            .map_err(|_| ShimError::Malformed("versioning response is not UTF-8".into()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let parsed: VersioningResponse =
            quick_xml::de::from_str(text).map_err(|e| ShimError::Malformed(e.to_string()))?;
        Ok(parsed.status().map(str::to_string))
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ShimError> {
        self.call(TransportRequest::new(Method::GET, bucket, Some(key)), false)
            .await?
            .into_bytes()
            .await
    }

    /// Streaming read of the whole object
    #[tracing::instrument(skip(self), err)]
    pub async fn open_object(&self, bucket: &str, key: &str) -> Result<ObjectStream, ShimError> {
        let response = self
            .call(TransportRequest::new(Method::GET, bucket, Some(key)), true)
            .await?;
        Ok(ObjectStream::from_response(response))
    }

    /// Streaming read of bytes `start..=end`, or `start..` when `end` is `None`
    #[tracing::instrument(skip(self), err)]
    pub async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<ObjectStream, ShimError> {
        let range = match end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        };
        let request =
            TransportRequest::new(Method::GET, bucket, Some(key)).with_header("Range", range);
        let response = self.call(request, true).await?;
        Ok(ObjectStream::from_response(response))
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, ShimError> {
        let response = self
            .call(TransportRequest::new(Method::HEAD, bucket, Some(key)), false)
            .await?;
        Ok(ObjectMetadata::from_response(&response))
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ShimError> {
        self.call(TransportRequest::new(Method::DELETE, bucket, Some(key)), false)
            .await?;
        Ok(())
    }

    /// `ListObjectsV2`, first page only
    #[tracing::instrument(skip(self), err)]
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectSummary>, ShimError> {
        let mut request =
            TransportRequest::new(Method::GET, bucket, None).with_query("list-type", "2");
        if let Some(prefix) = prefix {
            request = request.with_query("prefix", prefix);
        }
        let body = self.call(request, false).await?.into_bytes().await?;
        let text = std::str::from_utf8(&body)
            .map_err(|_| ShimError::Malformed("listing is not UTF-8".into()))?;
        let result: ListBucketResult =
            quick_xml::de::from_str(text).map_err(|e| ShimError::Malformed(e.to_string()))?;

        Ok(result
            .contents
            .into_iter()
            .map(|entry| ObjectSummary {
                key: entry.key,
                size: entry.size,
                etag: entry.etag,
            })
            .collect())
    }
}

impl fmt::Debug for AsyncStorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncStorageClient")
            .field("intercepted", &self.is_intercepted())
            .finish_non_exhaustive()
    }
}
