//! Transport seam
//!
//! [`HttpTransport`] is the point where the async client hands a request off.
//! [`ReqwestTransport`] sends it over the network; [`MockContextTransport`]
//! answers it in-process.

use super::adapter::MockResponseAdapter;
use super::context::MockContext;
use super::{AsyncResponse, BodyReader, ShimError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use hyper::{Method, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;

/// Characters left unescaped in object keys: unreserved set plus `/`
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// A path-style S3 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    /// Percent-encoded path, `/bucket` or `/bucket/key`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportRequest {
    pub fn new(method: Method, bucket: &str, key: Option<&str>) -> Self {
        let mut path = format!("/{}", utf8_percent_encode(bucket, KEY_ENCODE_SET));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&utf8_percent_encode(key, KEY_ENCODE_SET).to_string());
        }
        Self {
            method,
            path,
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends requests for the async storage client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<Box<dyn AsyncResponse>, ShimError>;
}

/// Network transport over reqwest. Requests are unsigned; emulators accept
/// them.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ReqwestTransport {
    pub fn new(endpoint: &str) -> Result<Self, ShimError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ShimError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(
        name = "transport.reqwest",
        skip(self, request),
        fields(http.method = %request.method, http.path = %request.path),
        err
    )]
    async fn send(&self, request: TransportRequest) -> Result<Box<dyn AsyncResponse>, ShimError> {
        let url = format!("{}{}", self.endpoint, request.path);
        let mut builder = self.client.request(request.method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| ShimError::Transport(e.to_string()))?;

        Ok(Box::new(ReqwestResponse::new(response)))
    }
}

/// Live network response
pub struct ReqwestResponse {
    status: StatusCode,
    headers: Vec<(Bytes, Bytes)>,
    inner: Option<reqwest::Response>,
    cached: Option<Bytes>,
}

impl ReqwestResponse {
    pub fn new(response: reqwest::Response) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    Bytes::copy_from_slice(name.as_str().as_bytes()),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();
        Self {
            status: response.status(),
            headers,
            inner: Some(response),
            cached: None,
        }
    }
}

#[async_trait]
impl AsyncResponse for ReqwestResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn raw_headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    async fn content(&mut self) -> Result<Bytes, ShimError> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        let response = self
            .inner
            .take()
            .ok_or_else(|| ShimError::Malformed("response body already consumed".into()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ShimError::Transport(e.to_string()))?;
        self.cached = Some(bytes.clone());
        Ok(bytes)
    }

    fn into_reader(self: Box<Self>) -> BodyReader {
        let this = *self;
        match (this.cached, this.inner) {
            (Some(cached), _) => Box::pin(futures::io::Cursor::new(cached)),
            (None, Some(response)) => {
                let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
                Box::pin(stream.into_async_read())
            }
            (None, None) => Box::pin(futures::io::Cursor::new(Bytes::new())),
        }
    }
}

/// In-process transport answering from a [`MockContext`]
#[derive(Debug, Clone)]
pub struct MockContextTransport {
    context: Arc<MockContext>,
}

impl MockContextTransport {
    pub fn new(context: Arc<MockContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<MockContext> {
        &self.context
    }
}

#[async_trait]
impl HttpTransport for MockContextTransport {
    async fn send(&self, request: TransportRequest) -> Result<Box<dyn AsyncResponse>, ShimError> {
        let response = self.context.handle(&request);
        Ok(Box::new(MockResponseAdapter::new(response)))
    }
}
