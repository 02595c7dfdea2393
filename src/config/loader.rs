//! Configuration loader with environment variable expansion

use super::{expand_env_vars, ConfigError, FixtureConfig};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FixtureConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` placeholders first
    pub fn parse(content: &str) -> Result<FixtureConfig, ConfigError> {
        let expanded = expand_env_vars(content);
        // An empty document deserializes to unit, not a mapping
        let config: FixtureConfig = if expanded.trim().is_empty() {
            serde_yaml::from_str("{}")?
        } else {
            serde_yaml::from_str(&expanded)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<FixtureConfig, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::parse(""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = ConfigLoader::parse("").unwrap();
        assert_eq!(config.emulator.port, 5555);
        assert_eq!(config.credentials.access_key_id, "foo");
        assert_eq!(config.buckets.len(), 3);
    }

    #[test]
    #[serial]
    fn test_load_expands_env_vars() {
        std::env::set_var("S3_TESTBED_TEST_PORT", "6123");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "emulator:\n  port: ${{S3_TESTBED_TEST_PORT}}").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.emulator.port, 6123);
        assert_eq!(config.emulator.command, "moto_server");
        std::env::remove_var("S3_TESTBED_TEST_PORT");
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let result = ConfigLoader::parse("emulator:\n  command: \"\"\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigLoader::load("/nonexistent/s3-testbed.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
