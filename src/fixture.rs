//! Composed fixtures
//!
//! [`S3Fixture`] is the external-emulator approach: a running emulator, the
//! scenario buckets, and clients pointed at it. [`MockFixture`] is the
//! in-process approach: a [`MockContext`] with the same buckets and an
//! intercepted [`AsyncStorageClient`]. Use one or the other per test.

use crate::config::{ConfigError, FixtureConfig};
use crate::emulator::{EmulatorError, EmulatorServer};
use crate::s3::{self, BucketProvisioner, CredentialsProvider, ProvisionError};
use crate::shim::{AsyncStorageClient, MockContext, ShimError};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Fixture errors
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Shim(#[from] ShimError),
}

/// A running emulator with provisioned buckets
#[derive(Debug)]
pub struct S3Fixture {
    emulator: EmulatorServer,
    client: aws_sdk_s3::Client,
    async_client: AsyncStorageClient,
    buckets: Vec<String>,
}

impl S3Fixture {
    /// Start the emulator and provision `config.buckets`.
    ///
    /// The emulator is shut down again if provisioning fails.
    #[tracing::instrument(name = "fixture.start", skip(config), err)]
    pub async fn start(config: &FixtureConfig) -> Result<Self, FixtureError> {
        config.validate()?;
        let started = Instant::now();

        let credentials = CredentialsProvider::resolve(&config.credentials);
        let emulator = EmulatorServer::start(&config.emulator, &credentials).await?;

        let client = s3::build_client(emulator.endpoint(), &credentials).await;
        let provisioner = BucketProvisioner::new(client, credentials.region());

        let buckets = match provisioner.provision(&config.buckets).await {
            Ok(buckets) => buckets,
            Err(e) => {
                tracing::error!(error = %e, "Provisioning failed, tearing down emulator");
                if let Err(shutdown_err) = emulator.stop().await {
                    tracing::warn!(error = %shutdown_err, "Emulator teardown failed");
                }
                return Err(e.into());
            }
        };

        let async_client = match AsyncStorageClient::connect(emulator.endpoint()) {
            Ok(client) => client,
            Err(e) => {
                if let Err(shutdown_err) = emulator.stop().await {
                    tracing::warn!(error = %shutdown_err, "Emulator teardown failed");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            endpoint = %emulator.endpoint(),
            buckets = ?buckets,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "S3 fixture ready"
        );

        Ok(Self {
            client: provisioner.client().clone(),
            emulator,
            async_client,
            buckets,
        })
    }

    /// SDK client for the emulator
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }

    pub fn async_client(&self) -> &AsyncStorageClient {
        &self.async_client
    }

    pub fn endpoint(&self) -> &str {
        self.emulator.endpoint()
    }

    /// Names of the provisioned buckets, in creation order
    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }

    pub fn emulator(&self) -> &EmulatorServer {
        &self.emulator
    }

    /// Stop the emulator without blocking the runtime
    pub async fn stop(self) -> Result<ExitStatus, FixtureError> {
        let status = self.emulator.stop().await?;
        tracing::info!(status = %status, "S3 fixture torn down");
        Ok(status)
    }

    /// Stop the emulator and wait for it to exit
    pub fn teardown(self) -> Result<ExitStatus, FixtureError> {
        let status = self.emulator.shutdown()?;
        tracing::info!(status = %status, "S3 fixture torn down");
        Ok(status)
    }
}

/// In-process counterpart of [`S3Fixture`]
#[derive(Debug)]
pub struct MockFixture {
    context: Arc<MockContext>,
    client: AsyncStorageClient,
}

impl MockFixture {
    /// Mock context holding the default scenario buckets, with versioning
    /// and the deny-unencrypted policy in place
    pub fn new() -> Self {
        Self::from_context(MockContext::with_specs(&s3::default_bucket_specs()))
    }

    pub fn with_buckets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_context(MockContext::with_buckets(names))
    }

    fn from_context(context: MockContext) -> Self {
        let context = Arc::new(context);
        let client = AsyncStorageClient::intercepted(context.clone());
        Self { context, client }
    }

    pub fn context(&self) -> &Arc<MockContext> {
        &self.context
    }

    pub fn client(&self) -> &AsyncStorageClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut AsyncStorageClient {
        &mut self.client
    }
}

impl Default for MockFixture {
    fn default() -> Self {
        Self::new()
    }
}
