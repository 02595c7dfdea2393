//! Configuration module for s3-testbed
//!
//! Handles loading and parsing of YAML fixture files with support for
//! environment variable expansion and validation. Every field has a default,
//! so an empty file (or `FixtureConfig::default()`) reproduces the canonical
//! fixture: `moto_server -p 5555` on `127.0.0.1` with three scenario buckets.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static::lazy_static! {
    static ref ENV_PLACEHOLDER: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("env placeholder pattern is valid");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_PORT", "6000");
/// assert_eq!(expand_env_vars("port: ${MY_PORT}"), "port: 6000");
/// assert_eq!(expand_env_vars("${MISSING:-5555}"), "5555");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(s, |caps: &regex_lite::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    // No env var and no default. Keep the original placeholder.
                    None => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Bucket names follow the S3 DNS-compatible rules: 3-63 characters of
/// lowercase letters, digits, dots and hyphens, starting and ending with a
/// letter or digit.
fn is_valid_bucket_name(name: &str) -> bool {
    let len_ok = (3..=63).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);
    len_ok && chars_ok && edges_ok
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default = "default_buckets")]
    pub buckets: Vec<BucketSpec>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            emulator: EmulatorConfig::default(),
            credentials: CredentialsConfig::default(),
            buckets: default_buckets(),
        }
    }
}

impl FixtureConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.emulator.validate()?;
        self.credentials.validate()?;

        let mut seen = HashSet::new();
        for bucket in &self.buckets {
            if !is_valid_bucket_name(&bucket.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid bucket name '{}'",
                    bucket.name
                )));
            }
            if !seen.insert(bucket.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Bucket '{}' is configured more than once",
                    bucket.name
                )));
            }
        }

        Ok(())
    }
}

/// Emulator process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Executable to launch. Supports ${VAR} expansion at load time.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments placed before the `-p <port>` flag
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Fail the start when the emulator never answers. When false the fixture
    /// proceeds after logging a warning.
    #[serde(default = "default_fail_on_timeout")]
    pub fail_on_timeout: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            host: default_host(),
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            fail_on_timeout: default_fail_on_timeout(),
        }
    }
}

impl EmulatorConfig {
    /// Endpoint URL probed for readiness and handed to clients
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Full argument vector passed to the emulator executable
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Emulator command cannot be empty".into(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Emulator host cannot be empty".into(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "Emulator port must be fixed (non-zero)".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms > self.startup_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "poll_interval_ms ({}) exceeds startup_timeout_ms ({})",
                self.poll_interval_ms, self.startup_timeout_ms
            )));
        }
        Ok(())
    }
}

fn default_command() -> String {
    "moto_server".to_string()
}

fn default_args() -> Vec<String> {
    Vec::new()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5555
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_startup_timeout_ms() -> u64 {
    5000
}

fn default_fail_on_timeout() -> bool {
    true
}

/// Placeholder credentials handed to the emulator and the clients.
///
/// Values set in the process environment (`AWS_ACCESS_KEY_ID` and friends)
/// take precedence over these when credentials are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_access_key")]
    pub access_key_id: String,
    #[serde(default = "default_secret_key")]
    pub secret_access_key: String,
    #[serde(default = "default_token")]
    pub session_token: String,
    #[serde(default = "default_token")]
    pub security_token: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key_id: default_access_key(),
            secret_access_key: default_secret_key(),
            session_token: default_token(),
            security_token: default_token(),
            region: default_region(),
        }
    }
}

impl CredentialsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "access_key_id and secret_access_key cannot be empty".into(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("region cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_access_key() -> String {
    "foo".to_string()
}

fn default_secret_key() -> String {
    "foo".to_string()
}

fn default_token() -> String {
    "testing".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Canned ACL applied when a bucket is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketAcl {
    Private,
    #[default]
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl BucketAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketAcl::Private => "private",
            BucketAcl::PublicRead => "public-read",
            BucketAcl::PublicReadWrite => "public-read-write",
            BucketAcl::AuthenticatedRead => "authenticated-read",
        }
    }
}

/// A bucket the fixture creates on a fresh emulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    #[serde(default)]
    pub acl: BucketAcl,
    #[serde(default)]
    pub versioned: bool,
    /// Attach the policy denying `PutObject` without `aws:kms` encryption
    #[serde(default)]
    pub deny_unencrypted_uploads: bool,
}

impl BucketSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            acl: BucketAcl::default(),
            versioned: false,
            deny_unencrypted_uploads: false,
        }
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn deny_unencrypted_uploads(mut self) -> Self {
        self.deny_unencrypted_uploads = true;
        self
    }

    pub fn with_acl(mut self, acl: BucketAcl) -> Self {
        self.acl = acl;
        self
    }
}

fn default_buckets() -> Vec<BucketSpec> {
    crate::s3::buckets::default_bucket_specs()
}
