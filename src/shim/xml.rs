//! S3 XML bodies shared by the mock context (serialize) and the async client
//! (deserialize)

use super::ShimError;
use serde::{Deserialize, Serialize};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// `<Error>` body returned with non-success statuses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "Error")]
pub struct S3ErrorBody {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(rename = "RequestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl S3ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            resource: None,
            request_id: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// `ListObjectsV2` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix", default)]
    pub prefix: String,
    #[serde(rename = "KeyCount", default)]
    pub key_count: usize,
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListEntry>,
}

/// One `<Contents>` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
}

/// `ListBuckets` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "Buckets")]
    pub buckets: BucketList,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketList {
    #[serde(rename = "Bucket", default)]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

/// `<VersioningConfiguration>` as sent with `PUT ?versioning` and returned by
/// `GET ?versioning`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename = "VersioningConfiguration")]
pub struct VersioningConfiguration {
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Lenient reading of a `GET ?versioning` body.
///
/// Accepts `<Status>` directly under the root, whatever the root is called,
/// or one level down inside a `<VersioningConfiguration>` wrapper.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersioningResponse {
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "VersioningConfiguration", default)]
    nested: Option<VersioningConfiguration>,
}

impl VersioningResponse {
    pub fn status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .or_else(|| self.nested.as_ref().and_then(|n| n.status.as_deref()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Serialize with the XML declaration S3 puts in front of every body
pub fn to_document<T: Serialize>(value: &T) -> Result<String, ShimError> {
    let body =
        quick_xml::se::to_string(value).map_err(|e| ShimError::Malformed(e.to_string()))?;
    Ok(format!("{}\n{}", XML_DECLARATION, body))
}

/// Parse an `<Error>` body, `None` if the bytes are not one
pub fn parse_error(body: &[u8]) -> Option<S3ErrorBody> {
    let text = std::str::from_utf8(body).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    quick_xml::de::from_str(text).ok()
}
