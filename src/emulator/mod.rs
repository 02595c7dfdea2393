//! Emulator bootstrap
//!
//! Starts a local S3 emulator (`moto_server -p 5555` by default) as a child
//! process and owns it until teardown.
//!
//! # Lifecycle
//!
//! 1. Claim the port in-process, then probe the endpoint. Anything answering
//!    with a success status is a leftover emulator: fail with
//!    [`EmulatorError::AlreadyRunning`].
//! 2. Spawn the emulator with stdio discarded and the placeholder credentials
//!    in its environment.
//! 3. Poll the endpoint at a fixed interval until it answers, the child exits,
//!    or the startup timeout elapses.
//! 4. On teardown ([`EmulatorServer::stop`] from async code,
//!    [`EmulatorServer::shutdown`] or drop otherwise) send SIGTERM, escalate
//!    to SIGKILL after a grace period, and reap the child. Failed starts reap
//!    the child on the blocking pool.
//!
//! # Example
//!
//! ```no_run
//! use s3_testbed::config::FixtureConfig;
//! use s3_testbed::emulator::EmulatorServer;
//! use s3_testbed::s3::CredentialsProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FixtureConfig::default();
//! let credentials = CredentialsProvider::resolve(&config.credentials);
//! let server = EmulatorServer::start(&config.emulator, &credentials).await?;
//! println!("emulator up at {}", server.endpoint());
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod readiness;
pub mod registry;

pub use readiness::{wait_until, Readiness, RetryPolicy};
pub use registry::PortClaim;

use crate::config::EmulatorConfig;
use crate::metrics;
use crate::s3::Credentials;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout for readiness probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed between SIGTERM and SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

const TERMINATE_POLL: Duration = Duration::from_millis(20);

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("An emulator is already running on port {port}")]
    AlreadyRunning { port: u16 },

    #[error("Failed to spawn emulator '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Emulator exited before becoming ready: {0}")]
    Exited(ExitStatus),

    #[error("Emulator did not answer on {endpoint} after {attempts} attempts ({elapsed:?})")]
    StartupTimeout {
        endpoint: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Emulator process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send one GET to `url`; true only when it answers with a success status.
///
/// Connection errors count as "not up".
pub async fn probe_endpoint(client: &reqwest::Client, url: &str) -> bool {
    metrics::READINESS_PROBES_TOTAL.inc();
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Probe failed");
            false
        }
    }
}

/// Build the HTTP client used for probing
pub fn probe_client() -> Result<reqwest::Client, EmulatorError> {
    Ok(reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?)
}

/// Whether `command` resolves to an executable file on `PATH`
pub fn command_available(command: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
}

/// A running emulator child process
#[derive(Debug)]
pub struct EmulatorServer {
    child: Option<Child>,
    endpoint: String,
    port: u16,
    readiness: Readiness,
    _claim: PortClaim,
}

impl EmulatorServer {
    /// Start the emulator and wait for it to answer
    #[tracing::instrument(
        name = "emulator.start",
        skip(config, credentials),
        fields(command = %config.command, port = config.port),
        err
    )]
    pub async fn start(
        config: &EmulatorConfig,
        credentials: &Credentials,
    ) -> Result<Self, EmulatorError> {
        let claim = PortClaim::acquire(config.port).ok_or_else(|| {
            metrics::record_emulator_start("already_running");
            EmulatorError::AlreadyRunning { port: config.port }
        })?;

        let endpoint = config.endpoint();
        let http = probe_client()?;

        // Should fail: nothing of ours is listening yet
        if probe_endpoint(&http, &endpoint).await {
            metrics::record_emulator_start("already_running");
            tracing::error!(endpoint = %endpoint, "Emulator endpoint already answering");
            return Err(EmulatorError::AlreadyRunning { port: config.port });
        }

        let mut child = Command::new(&config.command)
            .args(config.command_args())
            .envs(credentials.env_pairs())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| {
                metrics::record_emulator_start("spawn_failed");
                EmulatorError::SpawnFailed {
                    command: config.command.clone(),
                    source,
                }
            })?;

        tracing::info!(pid = child.id(), endpoint = %endpoint, "Emulator spawned, polling");

        let policy = RetryPolicy::from(config);
        let waited = wait_until(&policy, || {
            let exited = child.try_wait();
            let http = http.clone();
            let url = endpoint.clone();
            async move {
                match exited {
                    Ok(Some(status)) => Err(EmulatorError::Exited(status)),
                    Err(e) => Err(EmulatorError::Io(e)),
                    Ok(None) => Ok(probe_endpoint(&http, &url).await),
                }
            }
        })
        .await;

        let readiness = match waited {
            Ok(readiness) => readiness,
            Err(e) => {
                if matches!(e, EmulatorError::Exited(_)) {
                    metrics::record_emulator_start("exited");
                }
                if let Err(teardown) = reap_off_runtime(child).await {
                    tracing::warn!(error = %teardown, "Failed to reap emulator after startup error");
                }
                return Err(e);
            }
        };

        match readiness {
            Readiness::Ready { attempts, elapsed } => {
                metrics::record_emulator_start("ready");
                metrics::EMULATOR_STARTUP_SECONDS.observe(elapsed.as_secs_f64());
                tracing::info!(attempts, elapsed_ms = elapsed.as_millis() as u64, "Emulator up");
            }
            Readiness::TimedOut { attempts, elapsed } => {
                metrics::record_emulator_start("timeout");
                if config.fail_on_timeout {
                    if let Err(teardown) = reap_off_runtime(child).await {
                        tracing::warn!(error = %teardown, "Failed to reap emulator after timeout");
                    }
                    return Err(EmulatorError::StartupTimeout {
                        endpoint,
                        attempts,
                        elapsed,
                    });
                }
                // A dead emulator surfaces later as unrelated request failures
                tracing::warn!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    endpoint = %endpoint,
                    "Emulator never answered; continuing because fail_on_timeout is false"
                );
            }
        }

        Ok(Self {
            child: Some(child),
            endpoint,
            port: config.port,
            readiness,
            _claim: claim,
        })
    }

    /// Endpoint URL, with trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Child pid while the process is owned
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// How the readiness wait ended
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// Whether the child is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the emulator and block until it has exited
    pub fn shutdown(mut self) -> Result<ExitStatus, EmulatorError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| std::io::Error::other("emulator process already reaped"))?;
        let status = terminate(&mut child)?;
        tracing::info!(port = self.port, status = %status, "Emulator stopped");
        Ok(status)
    }

    /// Async counterpart of [`shutdown`](Self::shutdown).
    ///
    /// The grace period is waited out on the blocking pool so other tasks on
    /// the calling runtime keep running.
    pub async fn stop(mut self) -> Result<ExitStatus, EmulatorError> {
        let child = self
            .child
            .take()
            .ok_or_else(|| std::io::Error::other("emulator process already reaped"))?;
        let status = reap_off_runtime(child).await?;
        tracing::info!(port = self.port, status = %status, "Emulator stopped");
        Ok(status)
    }
}

impl Drop for EmulatorServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match terminate(&mut child) {
                Ok(status) => tracing::debug!(status = %status, "Emulator stopped on drop"),
                Err(e) => tracing::warn!(error = %e, "Failed to stop emulator on drop"),
            }
        }
    }
}

/// Ask the child to stop, force it after the grace period, and reap it
fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    request_stop(child)?;

    let deadline = std::time::Instant::now() + TERMINATE_GRACE;
    while std::time::Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        std::thread::sleep(TERMINATE_POLL);
    }

    tracing::warn!(pid = child.id(), "Emulator ignored SIGTERM, killing");
    child.kill()?;
    child.wait()
}

/// Run [`terminate`] on the blocking pool
async fn reap_off_runtime(mut child: Child) -> std::io::Result<ExitStatus> {
    tokio::task::spawn_blocking(move || terminate(&mut child))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(target_os = "linux")]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(std::io::Error::other)?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => {
            tracing::warn!(pid, error = %errno, "SIGTERM failed, killing");
            child.kill()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EmulatorError::AlreadyRunning { port: 5555 };
        assert_eq!(err.to_string(), "An emulator is already running on port 5555");

        let err = EmulatorError::StartupTimeout {
            endpoint: "http://127.0.0.1:5555/".into(),
            attempts: 50,
            elapsed: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("50 attempts"));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_reaps_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let status = terminate(&mut child).unwrap();
        assert!(!status.success());
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_already_exited_child() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        let status = terminate(&mut child).unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_available() {
        assert!(command_available("sh"));
        assert!(!command_available("definitely-not-an-emulator-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reap_off_runtime_reaps_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let status = reap_off_runtime(child).await.unwrap();
        assert!(!status.success());
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[tokio::test]
    async fn test_probe_unreachable_endpoint() {
        let client = probe_client().unwrap();
        // Port 9 (discard) is not listening for HTTP in test environments
        assert!(!probe_endpoint(&client, "http://127.0.0.1:9/").await);
    }
}
