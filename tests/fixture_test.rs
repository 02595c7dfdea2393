//! S3 Fixture End-to-End Tests
//!
//! These start a real `moto_server` and skip themselves when it is not on
//! `PATH`. Each test uses its own port so they can run in parallel.
//!
//! The first test reads versioning through the async client: some emulator
//! versions wrap the `GetBucketVersioning` body in an element the SDK will not
//! parse.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use s3_testbed::config::FixtureConfig;
    use s3_testbed::fixture::S3Fixture;
    use s3_testbed::s3::{
        default_bucket_specs, BucketProvisioner, ProvisionError, SECURE_BUCKET, TEST_BUCKET,
    };
    use s3_testbed::shim::PutOptions;
    use s3_testbed::skip_if_no_emulator;

    fn config(port: u16) -> FixtureConfig {
        let mut config = FixtureConfig::default();
        config.emulator.port = port;
        config.emulator.startup_timeout_ms = 20_000;
        config
    }

    #[tokio::test]
    async fn test_fixture_provisions_scenario_buckets() {
        skip_if_no_emulator!();
        s3_testbed::logging::init_test_logging();

        let fixture = S3Fixture::start(&config(5561)).await.unwrap();
        let listed = fixture.client().list_buckets().send().await.unwrap();
        let mut names: Vec<_> = listed
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(str::to_string)
            .collect();
        names.sort();
        assert_eq!(names, vec!["test", "test-secure", "test-versioned"]);

        let versioning = fixture
            .async_client()
            .get_bucket_versioning("test-versioned")
            .await
            .unwrap();
        assert_eq!(versioning.as_deref(), Some("Enabled"));

        let pid = fixture.emulator().pid().unwrap();
        fixture.teardown().unwrap();
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[tokio::test]
    async fn test_secure_bucket_requires_kms() {
        skip_if_no_emulator!();

        let fixture = S3Fixture::start(&config(5562)).await.unwrap();
        let provisioner = BucketProvisioner::new(fixture.client().clone(), "us-east-1");

        let rejected = provisioner
            .put_object(SECURE_BUCKET, "plain.txt", Bytes::from("plain"), false)
            .await
            .unwrap_err();
        assert!(matches!(rejected, ProvisionError::AccessDenied { .. }));

        let accepted = provisioner
            .put_object(SECURE_BUCKET, "kms.txt", Bytes::from("secret"), true)
            .await;
        assert!(accepted.is_ok(), "kms upload rejected: {:?}", accepted);

        fixture.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_async_client_against_emulator() {
        skip_if_no_emulator!();

        let fixture = S3Fixture::start(&config(5563)).await.unwrap();
        let client = fixture.async_client();
        client
            .put_object(TEST_BUCKET, "hello.txt", Bytes::from("hello"), Some("text/plain"))
            .await
            .unwrap();

        let body = client.get_object(TEST_BUCKET, "hello.txt").await.unwrap();
        let streamed = client
            .open_object(TEST_BUCKET, "hello.txt")
            .await
            .unwrap()
            .read_to_end()
            .await
            .unwrap();
        assert_eq!(body, streamed);

        let denied = client
            .put_object(SECURE_BUCKET, "plain.txt", Bytes::from("plain"), None)
            .await;
        // Emulators store the policy without enforcing it
        if let Err(e) = denied {
            assert_eq!(e.code(), Some("AccessDenied"));
        }
        client
            .put_object_with(SECURE_BUCKET, "kms.txt", Bytes::from("secret"), &PutOptions::new().kms())
            .await
            .unwrap();

        fixture.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reprovisioning_is_rejected() {
        skip_if_no_emulator!();

        let fixture = S3Fixture::start(&config(5564)).await.unwrap();
        let provisioner = BucketProvisioner::new(fixture.client().clone(), "us-east-1");

        let err = provisioner
            .provision(&default_bucket_specs())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BucketExists(name) if name == TEST_BUCKET));

        fixture.stop().await.unwrap();
    }
}
