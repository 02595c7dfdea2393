//! Asynchronous response interception
//!
//! The async storage client never parses HTTP responses itself. Every call
//! goes through two seams:
//!
//! - [`HttpTransport`] sends a request and hands back a `Box<dyn AsyncResponse>`.
//! - [`convert_response`] turns that response into a [`StructuredResponse`].
//!
//! [`ReqwestTransport`] backs the seam with real network I/O. The in-process
//! approach swaps in [`MockContextTransport`]: a [`MockContext`] answers
//! synchronously and [`MockResponseAdapter`] exposes the finished response
//! through the same async surface, so the conversion path is identical.
//!
//! # Example
//!
//! ```
//! use s3_testbed::shim::{AsyncStorageClient, MockContext};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), s3_testbed::shim::ShimError> {
//! let context = Arc::new(MockContext::with_buckets(["test"]));
//! let client = AsyncStorageClient::intercepted(context);
//!
//! client.put_object("test", "hello.txt", Bytes::from("hi"), None).await?;
//! let body = client.get_object("test", "hello.txt").await?;
//! assert_eq!(body, Bytes::from("hi"));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod context;
pub mod transport;
pub mod xml;

pub use adapter::{MockResponse, MockResponseAdapter};
pub use client::{AsyncStorageClient, ObjectMetadata, ObjectStream, ObjectSummary, PutOptions};
pub use context::{MockContext, RecordedRequest};
pub use transport::{HttpTransport, MockContextTransport, ReqwestTransport, TransportRequest};
pub use xml::S3ErrorBody;

use async_trait::async_trait;
use bytes::Bytes;
use futures::io::AsyncReadExt;
use hyper::StatusCode;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

/// Streaming body reader handed to range-read and streaming call sites
pub type BodyReader = Pin<Box<dyn futures::io::AsyncRead + Send>>;

/// Shim errors
#[derive(Error, Debug)]
pub enum ShimError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Body read error: {0}")]
    Body(#[from] std::io::Error),

    #[error("S3 error {status}: {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Client is already intercepted by a different mock context")]
    AlreadyIntercepted,
}

impl ShimError {
    /// S3 error code for service errors
    pub fn code(&self) -> Option<&str> {
        match self {
            ShimError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// The read/headers surface the conversion step consumes
#[async_trait]
pub trait AsyncResponse: Send {
    fn status(&self) -> StatusCode;

    /// Header pairs as raw byte strings, in wire order
    fn raw_headers(&self) -> &[(Bytes, Bytes)];

    /// The whole body
    async fn content(&mut self) -> Result<Bytes, ShimError>;

    /// The whole body as text (lossy UTF-8)
    async fn text(&mut self) -> Result<String, ShimError> {
        let content = self.content().await?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// The body as a byte reader
    fn into_reader(self: Box<Self>) -> BodyReader;
}

/// Converted response body
pub enum ResponseBody {
    Bytes(Bytes),
    Stream(BodyReader),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response after conversion: decoded headers, status, body, and the parsed
/// S3 error when the status is not a success
#[derive(Debug)]
pub struct StructuredResponse {
    pub status: StatusCode,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    pub error: Option<S3ErrorBody>,
}

impl StructuredResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Collect the body, draining the stream if there is one
    pub async fn into_bytes(self) -> Result<Bytes, ShimError> {
        match self.body {
            ResponseBody::Bytes(bytes) => Ok(bytes),
            ResponseBody::Stream(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    /// Turn a non-success response into [`ShimError::Service`]
    pub fn error_for_status(self) -> Result<Self, ShimError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let (code, message) = match &self.error {
            Some(error) => (error.code.clone(), error.message.clone()),
            None => (
                self.status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .replace(' ', ""),
                String::new(),
            ),
        };
        Err(ShimError::Service {
            status: self.status.as_u16(),
            code,
            message,
        })
    }
}

/// Convert a raw response into a [`StructuredResponse`].
///
/// Error statuses always read the whole body so the `<Error>` document can be
/// parsed. Successful streaming operations keep the body as a reader;
/// everything else is read eagerly.
pub async fn convert_response(
    mut response: Box<dyn AsyncResponse>,
    streaming: bool,
) -> Result<StructuredResponse, ShimError> {
    let status = response.status();
    let headers = decode_headers(response.raw_headers())?;

    if status.as_u16() >= 300 {
        let content = response.content().await?;
        let error = xml::parse_error(&content);
        return Ok(StructuredResponse {
            status,
            headers,
            body: ResponseBody::Bytes(content),
            error,
        });
    }

    let body = if streaming {
        ResponseBody::Stream(response.into_reader())
    } else {
        ResponseBody::Bytes(response.content().await?)
    };

    Ok(StructuredResponse {
        status,
        headers,
        body,
        error: None,
    })
}

fn decode_headers(raw: &[(Bytes, Bytes)]) -> Result<BTreeMap<String, String>, ShimError> {
    let mut headers = BTreeMap::new();
    for (name, value) in raw {
        let name = std::str::from_utf8(name)
            .map_err(|_| ShimError::Malformed("header name is not UTF-8".into()))?
            .to_ascii_lowercase();
        let value = String::from_utf8_lossy(value).into_owned();
        headers.insert(name, value);
    }
    Ok(headers)
}
