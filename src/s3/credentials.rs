//! S3 Credentials Module
//!
//! Placeholder credentials for the emulator and its clients.
//!
//! Credentials are resolved once and then passed explicitly: into the SDK
//! client builder and into the emulator child's environment. The parent
//! process environment is read but never written.
//!
//! # Example
//!
//! ```
//! use s3_testbed::config::CredentialsConfig;
//! use s3_testbed::s3::Credentials;
//!
//! let creds = Credentials::from_config(&CredentialsConfig::default());
//! assert_eq!(creds.access_key_id(), "foo");
//! assert_eq!(creds.env_pairs().len(), 4);
//! ```

use crate::config::CredentialsConfig;
use thiserror::Error;

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";
pub const SECURITY_TOKEN_VAR: &str = "AWS_SECURITY_TOKEN";

/// Provider name reported to the AWS SDK
const PROVIDER_NAME: &str = "s3-testbed";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Credentials for the emulator and the clients talking to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    security_token: Option<String>,
    region: String,
}

impl Credentials {
    /// Create new credentials without tokens
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            security_token: None,
            region: region.into(),
        }
    }

    /// Use the configured values as they are, ignoring the environment
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self {
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            session_token: Some(config.session_token.clone()).filter(|t| !t.is_empty()),
            security_token: Some(config.security_token.clone()).filter(|t| !t.is_empty()),
            region: config.region.clone(),
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The variables handed to the emulator child process
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (ACCESS_KEY_ID_VAR, self.access_key_id.clone()),
            (SECRET_ACCESS_KEY_VAR, self.secret_access_key.clone()),
        ];
        if let Some(token) = &self.session_token {
            pairs.push((SESSION_TOKEN_VAR, token.clone()));
        }
        if let Some(token) = &self.security_token {
            pairs.push((SECURITY_TOKEN_VAR, token.clone()));
        }
        pairs
    }

    /// Convert into the SDK's static credentials
    pub fn to_sdk_credentials(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            None,
            PROVIDER_NAME,
        )
    }
}

/// Factory methods for resolving credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials strictly from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    /// - `AWS_SECURITY_TOKEN` (optional)
    pub fn from_env(region: &str) -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var(ACCESS_KEY_ID_VAR).map_err(|_| {
            CredentialsError::MissingCredentials(format!("{} not set", ACCESS_KEY_ID_VAR))
        })?;

        let secret_key = std::env::var(SECRET_ACCESS_KEY_VAR).map_err(|_| {
            CredentialsError::MissingCredentials(format!("{} not set", SECRET_ACCESS_KEY_VAR))
        })?;

        let mut credentials = Credentials::new(access_key, secret_key, region);
        credentials.session_token = std::env::var(SESSION_TOKEN_VAR).ok();
        credentials.security_token = std::env::var(SECURITY_TOKEN_VAR).ok();
        Ok(credentials)
    }

    /// Resolve credentials, preferring each variable already present in the
    /// environment and falling back to the configured placeholder otherwise
    pub fn resolve(config: &CredentialsConfig) -> Credentials {
        let mut credentials = Credentials::from_config(config);
        if let Ok(value) = std::env::var(ACCESS_KEY_ID_VAR) {
            credentials.access_key_id = value;
        }
        if let Ok(value) = std::env::var(SECRET_ACCESS_KEY_VAR) {
            credentials.secret_access_key = value;
        }
        if let Ok(value) = std::env::var(SESSION_TOKEN_VAR) {
            credentials.session_token = Some(value);
        }
        if let Ok(value) = std::env::var(SECURITY_TOKEN_VAR) {
            credentials.security_token = Some(value);
        }

        tracing::debug!(
            access_key_id = %credentials.access_key_id,
            region = %credentials.region,
            "Resolved emulator credentials"
        );
        credentials
    }
}
