//! Bucket provisioning
//!
//! Creates the scenario buckets on a fresh emulator:
//!
//! | Bucket | ACL | Extra |
//! |--------|-----|-------|
//! | `test` | public-read | - |
//! | `test-versioned` | public-read | versioning enabled |
//! | `test-secure` | public-read | policy denying uploads without `aws:kms` SSE |
//!
//! Provisioning is not idempotent: running it against an emulator that already
//! holds one of the buckets fails with [`ProvisionError::BucketExists`]. The
//! existence check is a `HEAD` before each create, since some emulators answer
//! a repeated create in `us-east-1` with success.
//!
//! Emulators store bucket policies without evaluating them, so
//! [`BucketProvisioner::put_object`] checks the bucket's policy itself before
//! uploading.

use crate::config::BucketSpec;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, BucketVersioningStatus,
    CreateBucketConfiguration, ServerSideEncryption, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const TEST_BUCKET: &str = "test";
pub const VERSIONED_BUCKET: &str = "test-versioned";
pub const SECURE_BUCKET: &str = "test-secure";

/// Region in which S3 rejects an explicit location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Bucket '{0}' already exists on the emulator")]
    BucketExists(String),

    #[error("Access denied writing '{key}' to bucket '{bucket}'")]
    AccessDenied { bucket: String, key: String },

    #[error("S3 error on bucket '{bucket}': {message}")]
    S3Error { bucket: String, message: String },
}

/// The three scenario buckets
pub fn default_bucket_specs() -> Vec<BucketSpec> {
    vec![
        BucketSpec::new(TEST_BUCKET),
        BucketSpec::new(VERSIONED_BUCKET).versioned(),
        BucketSpec::new(SECURE_BUCKET).deny_unencrypted_uploads(),
    ]
}

/// Bucket policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<PolicyStatement>,
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Effect")]
    pub effect: String,
    #[serde(rename = "Principal")]
    pub principal: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Resource")]
    pub resource: String,
    /// Operator -> (condition key -> value)
    #[serde(rename = "Condition", default)]
    pub condition: BTreeMap<String, BTreeMap<String, String>>,
}

impl PolicyDocument {
    /// Deny `s3:PutObject` on `bucket` unless the request asks for `aws:kms`
    /// server-side encryption
    pub fn deny_unencrypted_uploads(bucket: &str) -> Self {
        let mut encryption = BTreeMap::new();
        encryption.insert(
            "s3:x-amz-server-side-encryption".to_string(),
            "aws:kms".to_string(),
        );
        let mut condition = BTreeMap::new();
        condition.insert("StringNotEquals".to_string(), encryption);

        Self {
            version: "2012-10-17".to_string(),
            id: "PutObjPolicy".to_string(),
            statement: vec![PolicyStatement {
                sid: "DenyUnEncryptedObjectUploads".to_string(),
                effect: "Deny".to_string(),
                principal: "*".to_string(),
                action: "s3:PutObject".to_string(),
                resource: format!("arn:aws:s3:::{}/*", bucket),
                condition,
            }],
        }
    }

    /// Whether a `Deny` statement rejects uploading `bucket/key` with the
    /// given `x-amz-server-side-encryption` value
    pub fn denies_put_object(
        &self,
        bucket: &str,
        key: &str,
        server_side_encryption: Option<&str>,
    ) -> bool {
        let arn = format!("arn:aws:s3:::{}/{}", bucket, key);
        self.statement.iter().any(|statement| {
            statement.effect == "Deny"
                && statement.covers_put_object(&arn)
                && statement.condition_holds(server_side_encryption)
        })
    }

    pub fn to_json(&self) -> String {
        // Plain strings and maps always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl PolicyStatement {
    fn covers_put_object(&self, arn: &str) -> bool {
        let action = matches!(self.action.as_str(), "s3:PutObject" | "s3:*" | "*");
        let resource = match self.resource.strip_suffix('*') {
            Some(prefix) => arn.starts_with(prefix),
            None => self.resource == arn,
        };
        action && resource
    }

    /// Every condition must hold. Only the SSE header key is known; unknown
    /// operators never hold.
    fn condition_holds(&self, server_side_encryption: Option<&str>) -> bool {
        self.condition.iter().all(|(operator, entries)| {
            entries.iter().all(|(key, expected)| {
                let actual = if key.eq_ignore_ascii_case("s3:x-amz-server-side-encryption") {
                    server_side_encryption
                } else {
                    None
                };
                match operator.as_str() {
                    "StringNotEquals" => actual != Some(expected.as_str()),
                    "StringEquals" => actual == Some(expected.as_str()),
                    "Null" => actual.is_none() == (expected == "true"),
                    _ => false,
                }
            })
        })
    }
}

/// The policy attached to buckets with `deny_unencrypted_uploads`
pub fn secure_bucket_policy(bucket: &str) -> String {
    PolicyDocument::deny_unencrypted_uploads(bucket).to_json()
}

/// Creates buckets through the SDK client
pub struct BucketProvisioner {
    client: Client,
    region: String,
}

impl BucketProvisioner {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Provision every spec in order, returning the created bucket names
    #[tracing::instrument(name = "s3.provision", skip(self, specs), fields(buckets = specs.len()))]
    pub async fn provision(&self, specs: &[BucketSpec]) -> Result<Vec<String>, ProvisionError> {
        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            self.create_bucket(spec).await?;
            if spec.versioned {
                self.enable_versioning(&spec.name).await?;
            }
            if spec.deny_unencrypted_uploads {
                self.attach_policy(&spec.name, &secure_bucket_policy(&spec.name))
                    .await?;
            }
            tracing::info!(
                bucket = %spec.name,
                acl = spec.acl.as_str(),
                versioned = spec.versioned,
                policy = spec.deny_unencrypted_uploads,
                "Bucket provisioned"
            );
            created.push(spec.name.clone());
        }
        Ok(created)
    }

    async fn create_bucket(&self, spec: &BucketSpec) -> Result<(), ProvisionError> {
        if self.bucket_exists(&spec.name).await? {
            return Err(ProvisionError::BucketExists(spec.name.clone()));
        }

        let mut request = self
            .client
            .create_bucket()
            .bucket(&spec.name)
            .acl(BucketCannedAcl::from(spec.acl.as_str()));

        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(|e| {
            let exists = e
                .as_service_error()
                .map(|se| se.is_bucket_already_exists() || se.is_bucket_already_owned_by_you())
                .unwrap_or(false);
            if exists {
                ProvisionError::BucketExists(spec.name.clone())
            } else {
                ProvisionError::S3Error {
                    bucket: spec.name.clone(),
                    message: DisplayErrorContext(&e).to_string(),
                }
            }
        })?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ProvisionError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(ProvisionError::S3Error {
                        bucket: bucket.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), ProvisionError> {
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| ProvisionError::S3Error {
                bucket: bucket.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn attach_policy(&self, bucket: &str, policy: &str) -> Result<(), ProvisionError> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| ProvisionError::S3Error {
                bucket: bucket.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    /// The bucket's policy, or `None` when it has none
    pub async fn bucket_policy(
        &self,
        bucket: &str,
    ) -> Result<Option<PolicyDocument>, ProvisionError> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => {
                let Some(text) = output.policy() else {
                    return Ok(None);
                };
                match serde_json::from_str(text) {
                    Ok(policy) => Ok(Some(policy)),
                    Err(e) => {
                        tracing::warn!(bucket = %bucket, error = %e, "Unrecognized bucket policy, not enforcing");
                        Ok(None)
                    }
                }
            }
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .and_then(|se| se.code())
                    .map(|code| code == "NoSuchBucketPolicy")
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);
                if missing {
                    Ok(None)
                } else {
                    Err(ProvisionError::S3Error {
                        bucket: bucket.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }

    /// Upload an object, optionally requesting `aws:kms` server-side
    /// encryption. Returns the ETag.
    ///
    /// A rejection by the bucket policy, whether evaluated here or by the
    /// server, maps to [`ProvisionError::AccessDenied`].
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        encrypt_with_kms: bool,
    ) -> Result<Option<String>, ProvisionError> {
        let encryption = encrypt_with_kms.then_some("aws:kms");
        if let Some(policy) = self.bucket_policy(bucket).await? {
            if policy.denies_put_object(bucket, key, encryption) {
                tracing::debug!(bucket = %bucket, key = %key, "Upload denied by bucket policy");
                return Err(ProvisionError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if encrypt_with_kms {
            request = request.server_side_encryption(ServerSideEncryption::AwsKms);
        }

        let output = request.send().await.map_err(|e| {
            let denied = e
                .as_service_error()
                .and_then(|se| se.code())
                .map(|code| code == "AccessDenied")
                .unwrap_or(false);
            if denied {
                ProvisionError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ProvisionError::S3Error {
                    bucket: bucket.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                }
            }
        })?;
        Ok(output.e_tag().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_default_specs() {
        let specs = default_bucket_specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["test", "test-versioned", "test-secure"]);
        assert!(specs[1].versioned);
        assert!(!specs[1].deny_unencrypted_uploads);
        assert!(specs[2].deny_unencrypted_uploads);
        assert!(specs.iter().all(|s| s.acl.as_str() == "public-read"));
    }

    #[test]
    fn test_secure_policy_document() {
        let policy: Value = serde_json::from_str(&secure_bucket_policy(SECURE_BUCKET)).unwrap();
        assert_eq!(policy["Version"], "2012-10-17");
        assert_eq!(policy["Id"], "PutObjPolicy");

        let statement = &policy["Statement"][0];
        assert_eq!(statement["Sid"], "DenyUnEncryptedObjectUploads");
        assert_eq!(statement["Effect"], "Deny");
        assert_eq!(statement["Principal"], "*");
        assert_eq!(statement["Action"], "s3:PutObject");
        assert_eq!(statement["Resource"], "arn:aws:s3:::test-secure/*");
        assert_eq!(
            statement["Condition"]["StringNotEquals"]["s3:x-amz-server-side-encryption"],
            "aws:kms"
        );
    }

    #[test]
    fn test_secure_policy_denies_only_unencrypted_uploads() {
        let policy = PolicyDocument::deny_unencrypted_uploads(SECURE_BUCKET);
        assert!(policy.denies_put_object(SECURE_BUCKET, "a.txt", None));
        assert!(policy.denies_put_object(SECURE_BUCKET, "a.txt", Some("AES256")));
        assert!(!policy.denies_put_object(SECURE_BUCKET, "a.txt", Some("aws:kms")));
        assert!(!policy.denies_put_object(TEST_BUCKET, "a.txt", None));
    }

    #[test]
    fn test_policy_round_trips_from_server_json() {
        let json = r#"{"Version":"2012-10-17","Id":"p","Statement":[
            {"Sid":"all","Effect":"Deny","Principal":"*","Action":"s3:*",
             "Resource":"arn:aws:s3:::locked/*"}]}"#;
        let policy: PolicyDocument = serde_json::from_str(json).unwrap();
        assert!(policy.statement[0].condition.is_empty());
        assert!(policy.denies_put_object("locked", "k", Some("aws:kms")));
        assert!(!policy.denies_put_object("locked-not", "k", None));
    }

    #[test]
    fn test_unknown_condition_operator_never_denies() {
        let mut policy = PolicyDocument::deny_unencrypted_uploads("b");
        let entries = policy.statement[0]
            .condition
            .remove("StringNotEquals")
            .unwrap();
        policy.statement[0]
            .condition
            .insert("IpAddress".to_string(), entries);
        assert!(!policy.denies_put_object("b", "k", None));
    }

    #[test]
    fn test_policy_field_order_is_stable() {
        let json = secure_bucket_policy("b");
        let version = json.find("\"Version\"").unwrap();
        let id = json.find("\"Id\"").unwrap();
        let statement = json.find("\"Statement\"").unwrap();
        assert!(version < id && id < statement);
    }
}
