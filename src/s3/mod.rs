//! S3 Client module
//!
//! Builds AWS SDK clients pointed at the local emulator and provisions the
//! scenario buckets.
//!
//! # Example
//!
//! ```no_run
//! use s3_testbed::config::CredentialsConfig;
//! use s3_testbed::s3::{build_client, Credentials};
//!
//! # async fn example() {
//! let credentials = Credentials::from_config(&CredentialsConfig::default());
//! let client = build_client("http://127.0.0.1:5555/", &credentials).await;
//! let buckets = client.list_buckets().send().await;
//! # }
//! ```

pub mod buckets;
pub mod credentials;

pub use buckets::{
    default_bucket_specs, secure_bucket_policy, BucketProvisioner, PolicyDocument,
    ProvisionError, SECURE_BUCKET, TEST_BUCKET, VERSIONED_BUCKET,
};
pub use credentials::{Credentials, CredentialsError, CredentialsProvider};

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;

/// Build an SDK client for `endpoint` with static credentials.
///
/// Uses path-style addressing; emulators do not resolve virtual-host buckets.
pub async fn build_client(endpoint: &str, credentials: &Credentials) -> Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .endpoint_url(endpoint.trim_end_matches('/'))
        .region(Region::new(credentials.region().to_string()))
        .credentials_provider(credentials.to_sdk_credentials())
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}
