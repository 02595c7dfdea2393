//! Emulator Bootstrap Integration Tests
//!
//! A wiremock server plays the emulator's HTTP endpoint while a throwaway
//! child process (`sleep`, `false`) plays the emulator process. This covers
//! the start/readiness/teardown contract without `moto_server` installed.
//!
//! ## Test Coverage
//!
//! - A prior emulator answering on the port fails the start
//! - Two concurrent starts on one port: one wins, one fails fast
//! - After teardown the child is gone from the process table
//! - A child that exits during polling surfaces its exit status
//! - Startup timeout is fatal by default and a warning when relaxed
//! - Reaping a failed start leaves the runtime free for other tasks

#[cfg(unix)]
#[cfg(test)]
mod tests {
    use s3_testbed::config::EmulatorConfig;
    use s3_testbed::emulator::{registry, EmulatorError, EmulatorServer, Readiness};
    use s3_testbed::s3::Credentials;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Emulator config whose "emulator" is a long sleep
    fn sleeper_config(port: u16) -> EmulatorConfig {
        EmulatorConfig {
            command: "sh".to_string(),
            args: vec!["-c".into(), "exec sleep 30".into(), "sh".into()],
            host: "127.0.0.1".to_string(),
            port,
            poll_interval_ms: 20,
            startup_timeout_ms: 2000,
            fail_on_timeout: true,
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("foo", "foo", "us-east-1")
            .with_session_token("testing")
            .with_security_token("testing")
    }

    /// Endpoint that is down for the pre-start probe, then comes up
    async fn endpoint_coming_up(mock_server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(mock_server)
            .await;
    }

    async fn endpoint_always_down(mock_server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(mock_server)
            .await;
    }

    fn process_exists(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    // ========================================================================
    // TEST: Already running
    // ========================================================================

    #[tokio::test]
    async fn test_start_fails_when_endpoint_already_answers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let port = mock_server.address().port();
        let err = EmulatorServer::start(&sleeper_config(port), &credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, EmulatorError::AlreadyRunning { port: p } if p == port));
        assert!(!registry::is_claimed(port), "claim must be released on failure");
    }

    #[tokio::test]
    async fn test_concurrent_starts_one_fails_fast() {
        let mock_server = MockServer::start().await;
        endpoint_coming_up(&mock_server).await;

        let config = sleeper_config(mock_server.address().port());
        let creds = credentials();

        let (first, second) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(
                EmulatorServer::start(&config, &creds),
                EmulatorServer::start(&config, &creds)
            )
        })
        .await
        .expect("concurrent starts must not hang");

        let (winner, loser) = match (first, second) {
            (Ok(server), Err(e)) | (Err(e), Ok(server)) => (server, e),
            (a, b) => panic!("expected exactly one start to succeed: {:?} / {:?}", a, b),
        };
        assert!(matches!(loser, EmulatorError::AlreadyRunning { .. }));
        assert!(winner.readiness().is_ready());
        winner.shutdown().unwrap();
    }

    // ========================================================================
    // TEST: Teardown
    // ========================================================================

    #[tokio::test]
    async fn test_process_gone_after_shutdown() {
        let mock_server = MockServer::start().await;
        endpoint_coming_up(&mock_server).await;

        let port = mock_server.address().port();
        let server = EmulatorServer::start(&sleeper_config(port), &credentials())
            .await
            .unwrap();
        let pid = server.pid().unwrap();
        assert!(process_exists(pid));
        assert_eq!(server.endpoint(), format!("http://127.0.0.1:{}/", port));

        let status = server.shutdown().unwrap();
        assert!(!status.success());
        assert!(!process_exists(pid), "child {} still in process table", pid);
        assert!(!registry::is_claimed(port));
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let mock_server = MockServer::start().await;
        endpoint_coming_up(&mock_server).await;

        let port = mock_server.address().port();
        let server = EmulatorServer::start(&sleeper_config(port), &credentials())
            .await
            .unwrap();
        let pid = server.pid().unwrap();

        drop(server);
        assert!(!process_exists(pid));
        assert!(!registry::is_claimed(port));
    }

    // ========================================================================
    // TEST: Startup failures
    // ========================================================================

    #[tokio::test]
    async fn test_child_exit_during_polling() {
        let mock_server = MockServer::start().await;
        endpoint_always_down(&mock_server).await;

        let mut config = sleeper_config(mock_server.address().port());
        config.command = "false".to_string();
        config.args = Vec::new();

        let err = EmulatorServer::start(&config, &credentials())
            .await
            .unwrap_err();
        match err {
            EmulatorError::Exited(status) => assert!(!status.success()),
            other => panic!("expected Exited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mock_server = MockServer::start().await;
        endpoint_always_down(&mock_server).await;

        let mut config = sleeper_config(mock_server.address().port());
        config.command = "definitely-not-an-emulator-binary".to_string();

        let err = EmulatorServer::start(&config, &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_fatal_by_default() {
        let mock_server = MockServer::start().await;
        endpoint_always_down(&mock_server).await;

        let mut config = sleeper_config(mock_server.address().port());
        config.startup_timeout_ms = 200;

        let err = EmulatorServer::start(&config, &credentials())
            .await
            .unwrap_err();
        match err {
            EmulatorError::StartupTimeout {
                attempts, elapsed, ..
            } => {
                assert!((1..=10).contains(&attempts), "attempts = {}", attempts);
                assert!(elapsed < Duration::from_secs(2), "elapsed = {:?}", elapsed);
            }
            other => panic!("expected StartupTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_tolerated_when_relaxed() {
        let mock_server = MockServer::start().await;
        endpoint_always_down(&mock_server).await;

        let mut config = sleeper_config(mock_server.address().port());
        config.startup_timeout_ms = 100;
        config.fail_on_timeout = false;

        let server = EmulatorServer::start(&config, &credentials())
            .await
            .unwrap();
        assert!(matches!(server.readiness(), Readiness::TimedOut { .. }));
        server.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_reaps_without_stalling_runtime() {
        let mock_server = MockServer::start().await;
        endpoint_always_down(&mock_server).await;

        // Ignores SIGTERM, so teardown waits out the full grace period
        let mut config = sleeper_config(mock_server.address().port());
        config.args = vec![
            "-c".into(),
            "trap '' TERM; exec sleep 30".into(),
            "sh".into(),
        ];
        config.startup_timeout_ms = 200;

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let err = EmulatorServer::start(&config, &credentials())
            .await
            .unwrap_err();
        ticker.abort();

        assert!(matches!(err, EmulatorError::StartupTimeout { .. }));
        // Five seconds of grace at 100ms per tick
        let ticked = ticks.load(Ordering::Relaxed);
        assert!(ticked >= 20, "runtime stalled during teardown: {} ticks", ticked);
    }
}
