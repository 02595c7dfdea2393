//! Synchronous mock responses behind the async response surface

use super::xml::{self, S3ErrorBody};
use super::{AsyncResponse, BodyReader, ShimError};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;

/// A fully materialized response produced by the mock context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// An S3 `<Error>` response
    pub fn error(status: StatusCode, error: S3ErrorBody) -> Self {
        match xml::to_document(&error) {
            Ok(document) => Self::new(status)
                .with_header("Content-Type", "application/xml")
                .with_body(document),
            Err(e) => {
                tracing::warn!(error = %e, code = %error.code, "Failed to encode error body");
                Self::new(status)
            }
        }
    }

    /// First header value with a case-insensitive name match
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Adapter exposing a [`MockResponse`] as an [`AsyncResponse`].
///
/// The mock is already complete, so `content` and `text` resolve without
/// suspending and the reader is a cursor over the same bytes.
#[derive(Debug, Clone)]
pub struct MockResponseAdapter {
    status: StatusCode,
    headers: Vec<(Bytes, Bytes)>,
    body: Bytes,
}

impl MockResponseAdapter {
    pub fn new(response: MockResponse) -> Self {
        let headers = response
            .headers
            .into_iter()
            .map(|(name, value)| (Bytes::from(name.into_bytes()), Bytes::from(value.into_bytes())))
            .collect();
        Self {
            status: response.status,
            headers,
            body: response.body,
        }
    }
}

impl From<MockResponse> for MockResponseAdapter {
    fn from(response: MockResponse) -> Self {
        Self::new(response)
    }
}

#[async_trait]
impl AsyncResponse for MockResponseAdapter {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn raw_headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    async fn content(&mut self) -> Result<Bytes, ShimError> {
        Ok(self.body.clone())
    }

    fn into_reader(self: Box<Self>) -> BodyReader {
        Box::pin(futures::io::Cursor::new(self.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::AsyncReadExt;

    #[test]
    fn test_headers_reencoded_as_bytes() {
        let adapter = MockResponseAdapter::new(
            MockResponse::new(StatusCode::OK)
                .with_header("ETag", "\"abc\"")
                .with_header("x-amz-request-id", "req-1"),
        );
        let headers = adapter.raw_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, Bytes::from_static(b"ETag"));
        assert_eq!(headers[0].1, Bytes::from_static(b"\"abc\""));
        assert_eq!(headers[1].0, Bytes::from_static(b"x-amz-request-id"));
    }

    #[tokio::test]
    async fn test_stream_and_text_paths_are_identical() {
        let payload = "línea 1\nline 2\n\u{1F980}";
        let response = MockResponse::new(StatusCode::OK).with_body(payload);

        let mut whole = MockResponseAdapter::new(response.clone());
        let text = whole.text().await.unwrap();
        let content = whole.content().await.unwrap();

        let streamed_adapter: Box<dyn AsyncResponse> =
            Box::new(MockResponseAdapter::new(response));
        let mut reader = streamed_adapter.into_reader();
        let mut streamed = Vec::new();
        reader.read_to_end(&mut streamed).await.unwrap();

        assert_eq!(text.as_bytes(), streamed.as_slice());
        assert_eq!(content.as_ref(), streamed.as_slice());
    }

    #[tokio::test]
    async fn test_reader_supports_chunked_reads() {
        let body: Vec<u8> = (0u8..=255).collect();
        let adapter: Box<dyn AsyncResponse> = Box::new(MockResponseAdapter::new(
            MockResponse::new(StatusCode::PARTIAL_CONTENT).with_body(body.clone()),
        ));
        let mut reader = adapter.into_reader();

        let mut first = [0u8; 100];
        reader.read_exact(&mut first).await.unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();

        assert_eq!(&first[..], &body[..100]);
        assert_eq!(rest.as_slice(), &body[100..]);
    }

    #[test]
    fn test_error_response_carries_xml() {
        let response = MockResponse::error(
            StatusCode::CONFLICT,
            S3ErrorBody::new("BucketAlreadyExists", "taken"),
        );
        assert_eq!(response.header("content-type"), Some("application/xml"));
        assert!(std::str::from_utf8(&response.body)
            .unwrap()
            .contains("<Code>BucketAlreadyExists</Code>"));
    }
}
